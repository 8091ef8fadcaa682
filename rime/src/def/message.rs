use {
    super::{
        DefData, DefKind, FieldDef, FrozenDef, OneofDef, SymRef,
        check_name, def_handle, sub_name,
    },
    crate::{
        Error, Result,
        refcounted::{Link, Owner, Ref, SubRef},
    },
    rime_table::{IntTable, StrTable},
};

pub (crate) struct MsgData
{
    pub fields: Vec<SubRef<DefData>>,
    pub itof: IntTable<usize>,
    pub ntof: StrTable<usize>,
    pub oneofs: Vec<SubRef<DefData>>,
    pub ntoo: StrTable<usize>,
    pub map_entry: bool,

    /// Computed right before freezing.
    pub layout: Option<MsgLayout>,
}

/// Order of the fields of a frozen message and its selector space.
pub (crate) struct MsgLayout
{
    /// Index into `fields` of each frozen field, in frozen order.
    pub order: Vec<usize>,
    pub selector_count: u32,
    pub submsg_field_count: u32,
}

pub (crate) struct FrozenMsg
{
    /// Submessage fields first, then by number.
    pub fields: Vec<Link<FrozenDef>>,

    /// Indices into `fields`, in field number order.
    pub by_number: Vec<usize>,

    pub itof: IntTable<usize>,
    pub ntof: StrTable<usize>,
    pub oneofs: Vec<Link<FrozenDef>>,
    pub ntoo: StrTable<usize>,
    pub map_entry: bool,
    pub selector_count: u32,
    pub submsg_field_count: u32,
}

impl MsgData
{
    fn new() -> Self
    {
        Self{
            fields: Vec::new(),
            itof: IntTable::new(),
            ntof: StrTable::new(),
            oneofs: Vec::new(),
            ntoo: StrTable::new(),
            map_entry: false,
            layout: None,
        }
    }

    pub (super) fn freeze(self, link: &mut dyn FnMut(&SubRef<DefData>) -> Link<FrozenDef>)
        -> FrozenMsg
    {
        let layout = self.layout.unwrap_or_else(|| MsgLayout{
            order: (0 .. self.fields.len()).collect(),
            selector_count: 0,
            submsg_field_count: 0,
        });

        let mut position = vec![0; layout.order.len()];
        for (i, &orig) in layout.order.iter().enumerate() {
            position[orig] = i;
        }
        let mut itof = IntTable::new();
        for (number, &orig) in self.itof.iter() {
            let _ = itof.insert(number, position[orig]);
        }
        let mut ntof = StrTable::new();
        for (name, &orig) in self.ntof.iter() {
            let _ = ntof.insert(name, position[orig]);
        }
        let _ = itof.compact();

        let mut numbered: Vec<(u64, usize)> =
            itof.iter().map(|(number, &i)| (number, i)).collect();
        numbered.sort_unstable();

        FrozenMsg{
            fields: layout.order.iter().map(|&i| link(&self.fields[i])).collect(),
            by_number: numbered.into_iter().map(|(_, i)| i).collect(),
            itof,
            ntof,
            oneofs: self.oneofs.iter().map(link).collect(),
            ntoo: self.ntoo,
            map_entry: self.map_entry,
            selector_count: layout.selector_count,
            submsg_field_count: layout.submsg_field_count,
        }
    }
}

fn has_member(list: &[SubRef<DefData>], sub: &SubRef<DefData>) -> bool
{
    list.iter().any(|s| s.ptr_eq(sub))
}

/// Mutable handle to a message definition.
#[derive(Clone)]
pub struct MessageDef(pub (crate) Ref<DefData>);

def_handle!(MessageDef, MessageView, Msg, MsgData);

impl MessageDef
{
    /// Create an anonymous message with no fields.
    pub fn new() -> Self
    {
        MessageDef(Ref::new(DefData::new(DefKind::Msg(MsgData::new())), Owner::UNTRACKED))
    }

    /// Create a message with the given full name.
    pub fn named(full_name: &str) -> Result<Self>
    {
        let msg = Self::new();
        msg.set_full_name(full_name)?;
        Ok(msg)
    }

    /// Full name of the message.
    pub fn full_name(&self) -> Option<String>
    {
        self.as_def().full_name()
    }

    /// Set the full name of the message.
    pub fn set_full_name(&self, name: &str) -> Result<()>
    {
        check_name(name, true)?;
        self.with_mut(|n, _| *n = Some(name.to_owned()))
    }

    /// Mark the message as the entry type of a map field.
    pub fn set_map_entry(&self, map_entry: bool) -> Result<()>
    {
        self.with_mut(|_, m| m.map_entry = map_entry)
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize
    {
        match self.view() {
            Some(view) => view.field_count(),
            None => self.with(|_, m| m.fields.len()).unwrap_or(0),
        }
    }

    /// Add a field to the message.
    ///
    /// Adding a field twice is a no-op.
    /// A field that is in a oneof requires that oneof to be in the message.
    pub fn add_field(&self, field: &FieldDef) -> Result<()>
    {
        let sub = SubRef::Mutable(field.obj().clone());
        if self.with(|_, m| has_member(&m.fields, &sub))? {
            return Ok(());
        }

        let (name, number) = field.with(|def, d| -> Result<_> {
            if let Some(SymRef::Direct(_)) = d.containing {
                return Err(Error::OwnedElsewhere);
            }
            if let Some(oneof) = &d.oneof {
                if !self.with(|_, m| has_member(&m.oneofs, oneof))? {
                    return Err(Error::InvalidField(
                        "field is in a oneof that is not in the message".into(),
                    ));
                }
            }
            match (&def.name, d.number) {
                (Some(n), number) if number != 0 => Ok((n.clone(), number)),
                _ => Err(Error::InvalidField("field needs a name and number".into())),
            }
        })??;

        self.with_mut(|_, m| -> Result<()> {
            if m.ntof.contains(&name) {
                return Err(Error::NameConflict(name));
            }
            if m.itof.contains(number.into()) {
                return Err(Error::NumberConflict(number));
            }
            let index = m.fields.len();
            m.itof.insert(number.into(), index)?;
            if let Err(err) = m.ntof.insert(&name, index) {
                m.itof.remove(number.into());
                return Err(err.into());
            }
            m.fields.push(SubRef::new(self.obj(), field.obj()));
            Ok(())
        })??;

        let back = SubRef::new(field.obj(), self.obj());
        field.with_mut(|_, d| d.containing = Some(SymRef::Direct(back)))
    }

    /// Add a oneof and its fields to the message.
    ///
    /// Adding a oneof twice is a no-op.
    pub fn add_oneof(&self, oneof: &OneofDef) -> Result<()>
    {
        let sub = SubRef::Mutable(oneof.obj().clone());
        if self.with(|_, m| has_member(&m.oneofs, &sub))? {
            return Ok(());
        }

        let (name, fields) = oneof.with(|def, o| -> Result<_> {
            if o.parent.is_some() {
                return Err(Error::OwnedElsewhere);
            }
            let name = def.name.clone()
                .ok_or_else(|| Error::InvalidField("oneof needs a name".into()))?;
            Ok((name, o.fields.clone()))
        })??;

        // Check every field first so a conflict leaves the message unchanged.
        self.with(|_, m| -> Result<()> {
            if m.ntoo.contains(&name) {
                return Err(Error::NameConflict(name.clone()));
            }
            for field in &fields {
                if has_member(&m.fields, field) {
                    continue;
                }
                let field = field.as_mutable().ok_or(Error::Frozen)?;
                let (n, number) = field.with(|d| match &d.kind {
                    DefKind::Field(f) => (d.name.clone().unwrap_or_default(), f.number),
                    _ => unreachable!("Oneof members are fields"),
                })?;
                if m.ntof.contains(&n) {
                    return Err(Error::NameConflict(n));
                }
                if m.itof.contains(number.into()) {
                    return Err(Error::NumberConflict(number));
                }
            }
            Ok(())
        })??;

        self.with_mut(|_, m| -> Result<()> {
            m.ntoo.insert(&name, m.oneofs.len())?;
            m.oneofs.push(SubRef::new(self.obj(), oneof.obj()));
            Ok(())
        })??;
        let parent = SubRef::new(oneof.obj(), self.obj());
        oneof.with_mut(|_, o| o.parent = Some(parent))?;

        for field in &fields {
            if let Some(obj) = field.as_mutable() {
                self.add_field(&FieldDef(obj.take_ref(Owner::UNTRACKED)))?;
            }
        }
        Ok(())
    }

    /// Field with the given number.
    pub fn field_by_number(&self, number: u32) -> Option<FieldDef>
    {
        self.with(|_, m| {
            m.itof.lookup(number.into()).map(|&i| m.fields[i].clone())
        }).ok().flatten().and_then(|s| s.as_mutable().map(field_handle))
    }

    /// Field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<FieldDef>
    {
        self.with(|_, m| {
            m.ntof.lookup(name).map(|&i| m.fields[i].clone())
        }).ok().flatten().and_then(|s| s.as_mutable().map(field_handle))
    }

    /// Oneof with the given name.
    pub fn oneof_by_name(&self, name: &str) -> Option<OneofDef>
    {
        self.with(|_, m| {
            m.ntoo.lookup(name).map(|&i| m.oneofs[i].clone())
        }).ok().flatten()
            .and_then(|s| s.as_mutable().map(|o| OneofDef(o.take_ref(Owner::UNTRACKED))))
    }

    /// Names of the fields, in the order they were added.
    pub fn field_names(&self) -> Vec<String>
    {
        self.with(|_, m| m.fields.iter().filter_map(sub_name).collect())
            .unwrap_or_default()
    }

    /// Copy the message and its fields and oneofs.
    ///
    /// References to submessages and enums become symbolic in the copy,
    /// so they must be resolved again, usually by a symbol table.
    /// References to anonymous definitions are dropped.
    pub fn dup(&self) -> Result<MessageDef>
    {
        Ok(MessageDef(self.as_def().dup()?.0))
    }
}

impl Default for MessageDef
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn field_handle(obj: &crate::refcounted::Obj<DefData>) -> FieldDef
{
    FieldDef(obj.take_ref(Owner::UNTRACKED))
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::def::FieldType};

    #[test]
    fn add_field_conflicts()
    {
        let m = MessageDef::named("pkg.M").unwrap();
        let x = FieldDef::named("x", 1, FieldType::Int32).unwrap();
        m.add_field(&x).unwrap();
        m.add_field(&x).unwrap();
        assert_eq!(m.field_count(), 1);

        let x2 = FieldDef::named("x", 2, FieldType::Int32).unwrap();
        assert_eq!(m.add_field(&x2), Err(Error::NameConflict("x".into())));
        let y = FieldDef::named("y", 1, FieldType::Int32).unwrap();
        assert_eq!(m.add_field(&y), Err(Error::NumberConflict(1)));
        assert_eq!(m.field_count(), 1);

        let other = MessageDef::new();
        assert_eq!(other.add_field(&x), Err(Error::OwnedElsewhere));
        assert!(m.field_by_name("x").is_some());
        assert!(m.field_by_number(1).is_some());
        assert!(m.field_by_number(2).is_none());
    }

    #[test]
    fn add_oneof_adds_fields()
    {
        let m = MessageDef::named("M").unwrap();
        let o = OneofDef::named("choice").unwrap();
        let a = FieldDef::named("a", 1, FieldType::Int32).unwrap();
        let b = FieldDef::named("b", 2, FieldType::String).unwrap();
        o.add_field(&a).unwrap();
        o.add_field(&b).unwrap();
        m.add_oneof(&o).unwrap();
        assert_eq!(m.field_names(), ["a", "b"]);
        assert!(m.oneof_by_name("choice").is_some());

        let c = FieldDef::named("c", 3, FieldType::Int32).unwrap();
        o.add_field(&c).unwrap();
        assert!(m.field_by_name("c").is_some());
    }

    #[test]
    fn oneof_conflict_leaves_message_unchanged()
    {
        let m = MessageDef::named("M").unwrap();
        m.add_field(&FieldDef::named("a", 1, FieldType::Int32).unwrap()).unwrap();
        let o = OneofDef::named("choice").unwrap();
        o.add_field(&FieldDef::named("b", 2, FieldType::Int32).unwrap()).unwrap();
        o.add_field(&FieldDef::named("c", 1, FieldType::Int32).unwrap()).unwrap();
        assert_eq!(m.add_oneof(&o), Err(Error::NumberConflict(1)));
        assert_eq!(m.field_count(), 1);
        assert!(m.oneof_by_name("choice").is_none());
    }
}
