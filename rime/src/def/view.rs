use {
    super::{
        Def, DefType, DefaultValue, FieldType, FrozenDef, FrozenEnum, FrozenField,
        FrozenKind, FrozenMsg, FrozenOneof, IntFmt, Label, descriptor_type, enum_key,
    },
    crate::{Result, refcounted::{Handle, Link}, wire::DescriptorType},
    std::fmt,
};

/// Frozen definition of any kind.
///
/// Views are immutable, cheap to clone, and may be sent between threads.
#[derive(Clone)]
pub struct DefView(pub (crate) Handle<FrozenDef>);

impl DefView
{
    /// Kind of the definition.
    pub fn def_type(&self) -> DefType
    {
        self.0.get().def_type()
    }

    /// Full name for messages and enums, short name for fields and oneofs.
    pub fn full_name(&self) -> Option<&str>
    {
        self.0.get().name.as_deref()
    }

    /// Whether both views are of the same definition.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        self.0.ptr_eq(&other.0)
    }

    /// Address of the definition, as a table key.
    pub fn addr(&self) -> u64
    {
        self.0.addr()
    }

    /// The definition as a message, if it is one.
    pub fn as_message(&self) -> Option<MessageView>
    {
        (self.def_type() == DefType::MSG).then(|| MessageView(self.clone()))
    }

    /// The definition as a field, if it is one.
    pub fn as_field(&self) -> Option<FieldView>
    {
        (self.def_type() == DefType::FIELD).then(|| FieldView(self.clone()))
    }

    /// The definition as an enum, if it is one.
    pub fn as_enum(&self) -> Option<EnumView>
    {
        (self.def_type() == DefType::ENUM).then(|| EnumView(self.clone()))
    }

    /// The definition as a oneof, if it is one.
    pub fn as_oneof(&self) -> Option<OneofView>
    {
        (self.def_type() == DefType::ONEOF).then(|| OneofView(self.clone()))
    }

    /// Copy the definition into a mutable one.
    ///
    /// See [`MessageDef::dup`] for how references are copied.
    ///
    /// [`MessageDef::dup`]: `super::MessageDef::dup`
    pub fn dup(&self) -> Result<Def>
    {
        super::dup::dup_view(self)
    }

    fn follow(&self, link: &Link<FrozenDef>) -> DefView
    {
        DefView(self.0.follow(link))
    }
}

impl fmt::Debug for DefView
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{:?}({:?})", self.def_type(), self.full_name())
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Messages                                   */
/* -------------------------------------------------------------------------- */

/// Frozen message definition.
#[derive(Clone, Debug)]
pub struct MessageView(pub (crate) DefView);

impl MessageView
{
    fn data(&self) -> &FrozenMsg
    {
        match &self.0.0.get().kind {
            FrozenKind::Msg(m) => m,
            _ => unreachable!("View kind matches its data"),
        }
    }

    /// The view as an untyped definition.
    pub fn as_def(&self) -> &DefView
    {
        &self.0
    }

    /// Full name of the message.
    pub fn full_name(&self) -> Option<&str>
    {
        self.0.full_name()
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize
    {
        self.data().fields.len()
    }

    /// Number of handler slots a handler table for the message needs.
    pub fn selector_count(&self) -> u32
    {
        self.data().selector_count
    }

    /// Number of message-typed fields.
    ///
    /// These are the fields with index below this count.
    pub fn submsg_field_count(&self) -> u32
    {
        self.data().submsg_field_count
    }

    /// Whether the message is the entry type of a map field.
    pub fn is_map_entry(&self) -> bool
    {
        self.data().map_entry
    }

    /// Field by its index.
    pub fn field(&self, index: usize) -> Option<FieldView>
    {
        let link = self.data().fields.get(index)?;
        Some(FieldView(self.0.follow(link)))
    }

    /// Fields in field number order.
    pub fn fields(&self) -> impl Iterator<Item=FieldView> + '_
    {
        self.data().by_number.iter()
            .map(move |&i| FieldView(self.0.follow(&self.data().fields[i])))
    }

    /// Field with the given number.
    pub fn field_by_number(&self, number: u32) -> Option<FieldView>
    {
        let &i = self.data().itof.lookup(number.into())?;
        self.field(i)
    }

    /// Field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<FieldView>
    {
        let &i = self.data().ntof.lookup(name)?;
        self.field(i)
    }

    /// Oneofs, in the order they were added.
    pub fn oneofs(&self) -> impl Iterator<Item=OneofView> + '_
    {
        self.data().oneofs.iter().map(move |link| OneofView(self.0.follow(link)))
    }

    /// Oneof with the given name.
    pub fn oneof_by_name(&self, name: &str) -> Option<OneofView>
    {
        let &i = self.data().ntoo.lookup(name)?;
        Some(OneofView(self.0.follow(&self.data().oneofs[i])))
    }

    /// Whether both views are of the same message.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        self.0.ptr_eq(&other.0)
    }

    /// Address of the message, as a table key.
    pub fn addr(&self) -> u64
    {
        self.0.addr()
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Fields                                    */
/* -------------------------------------------------------------------------- */

/// Frozen field definition.
#[derive(Clone, Debug)]
pub struct FieldView(pub (crate) DefView);

impl FieldView
{
    fn data(&self) -> &FrozenField
    {
        match &self.0.0.get().kind {
            FrozenKind::Field(d) => d,
            _ => unreachable!("View kind matches its data"),
        }
    }

    /// The view as an untyped definition.
    pub fn as_def(&self) -> &DefView
    {
        &self.0
    }

    /// Short name of the field.
    pub fn name(&self) -> Option<&str>
    {
        self.0.full_name()
    }

    /// Field number.
    pub fn number(&self) -> u32
    {
        self.data().number
    }

    /// Type of the field's values.
    pub fn field_type(&self) -> FieldType
    {
        self.data().field_type
    }

    /// Descriptor type of the field.
    pub fn descriptor_type(&self) -> DescriptorType
    {
        let d = self.data();
        descriptor_type(d.field_type, d.int_fmt, d.tag_delim)
            .expect("Frozen fields have a valid descriptor type")
    }

    /// Cardinality of the field.
    pub fn label(&self) -> Label
    {
        self.data().label
    }

    /// Integer encoding of the field.
    pub fn int_fmt(&self) -> IntFmt
    {
        self.data().int_fmt
    }

    /// Whether the field is repeated.
    pub fn is_sequence(&self) -> bool
    {
        self.label() == Label::Repeated
    }

    /// Whether repeated values are packed.
    ///
    /// Only repeated primitive fields are ever packed.
    pub fn packed(&self) -> bool
    {
        self.data().packed
    }

    /// Whether the field may be parsed lazily.
    pub fn lazy(&self) -> bool
    {
        self.data().lazy
    }

    /// Whether the field is an extension.
    pub fn is_extension(&self) -> bool
    {
        self.data().is_extension
    }

    /// Whether the message field is encoded as a group.
    pub fn is_tag_delimited(&self) -> bool
    {
        self.data().tag_delim
    }

    /// Whether values are messages.
    pub fn is_submessage(&self) -> bool
    {
        self.field_type() == FieldType::Message
    }

    /// Whether values are strings or bytes.
    pub fn is_string(&self) -> bool
    {
        self.field_type().is_string()
    }

    /// Whether values are single scalars.
    pub fn is_primitive(&self) -> bool
    {
        self.field_type().is_primitive()
    }

    /// Default value, absent for message fields.
    pub fn default_value(&self) -> Option<&DefaultValue>
    {
        self.data().default.as_ref()
    }

    /// Index of the field within its message.
    pub fn index(&self) -> u32
    {
        self.data().index
    }

    /// First handler slot of the field.
    pub fn selector_base(&self) -> u32
    {
        self.data().selector_base
    }

    /// Message the field is in.
    pub fn containing_type(&self) -> Option<MessageView>
    {
        let link = self.data().containing.as_ref()?;
        self.0.follow(link).as_message()
    }

    /// Name of the extended message, for extensions frozen on their own.
    pub fn containing_type_name(&self) -> Option<&str>
    {
        self.data().containing_name.as_deref()
    }

    /// Message or enum the values are instances of.
    pub fn subdef(&self) -> Option<DefView>
    {
        let link = self.data().subdef.as_ref()?;
        Some(self.0.follow(link))
    }

    /// Message the values are instances of.
    pub fn message_subdef(&self) -> Option<MessageView>
    {
        self.subdef()?.as_message()
    }

    /// Enum the values are instances of.
    pub fn enum_subdef(&self) -> Option<EnumView>
    {
        self.subdef()?.as_enum()
    }

    /// Oneof the field is in.
    pub fn oneof(&self) -> Option<OneofView>
    {
        let link = self.data().oneof.as_ref()?;
        self.0.follow(link).as_oneof()
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Enums                                    */
/* -------------------------------------------------------------------------- */

/// Frozen enum definition.
#[derive(Clone, Debug)]
pub struct EnumView(pub (crate) DefView);

impl EnumView
{
    fn data(&self) -> &FrozenEnum
    {
        match &self.0.0.get().kind {
            FrozenKind::Enum(e) => e,
            _ => unreachable!("View kind matches its data"),
        }
    }

    /// The view as an untyped definition.
    pub fn as_def(&self) -> &DefView
    {
        &self.0
    }

    /// Full name of the enum.
    pub fn full_name(&self) -> Option<&str>
    {
        self.0.full_name()
    }

    /// Default value.
    pub fn default_value(&self) -> i32
    {
        self.data().default
    }

    /// Number of values, counting repeated numbers.
    pub fn value_count(&self) -> usize
    {
        self.data().values.len()
    }

    /// Values in the order they were added.
    pub fn values(&self) -> impl Iterator<Item=(&str, i32)>
    {
        self.data().values.iter().map(|(name, n)| (name.as_str(), *n))
    }

    /// Number of the value with the given name.
    pub fn number_of(&self, name: &str) -> Option<i32>
    {
        self.data().ntoi.lookup(name).copied()
    }

    /// Name of the first value added with the given number.
    pub fn name_of(&self, number: i32) -> Option<&str>
    {
        self.data().iton.lookup(enum_key(number)).map(String::as_str)
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Oneofs                                    */
/* -------------------------------------------------------------------------- */

/// Frozen oneof definition.
#[derive(Clone, Debug)]
pub struct OneofView(pub (crate) DefView);

impl OneofView
{
    fn data(&self) -> &FrozenOneof
    {
        match &self.0.0.get().kind {
            FrozenKind::Oneof(o) => o,
            _ => unreachable!("View kind matches its data"),
        }
    }

    /// Name of the oneof.
    pub fn name(&self) -> Option<&str>
    {
        self.0.full_name()
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize
    {
        self.data().fields.len()
    }

    /// Fields in the order they were added.
    pub fn fields(&self) -> impl Iterator<Item=FieldView> + '_
    {
        self.data().fields.iter().map(move |link| FieldView(self.0.follow(link)))
    }

    /// Field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<FieldView>
    {
        let &i = self.data().ntof.lookup(name)?;
        Some(FieldView(self.0.follow(&self.data().fields[i])))
    }

    /// Field with the given number.
    pub fn field_by_number(&self, number: u32) -> Option<FieldView>
    {
        let &i = self.data().itof.lookup(number.into())?;
        Some(FieldView(self.0.follow(&self.data().fields[i])))
    }

    /// Message the oneof is in.
    pub fn containing_type(&self) -> Option<MessageView>
    {
        let link = self.data().parent.as_ref()?;
        self.0.follow(link).as_message()
    }
}
