use {
    super::{
        Def, DefData, DefKind, DefView, DefaultValue, EnumDef, FieldData, FieldDef,
        FieldType, FieldView, IntFmt, Label, MessageDef, OneofDef, SymRef, sub_name,
    },
    crate::{
        Result,
        refcounted::{Owner, Ref, SubRef},
    },
};

/// Everything a copied field keeps, with references by name.
struct FieldCopy
{
    name: Option<String>,
    field_type: Option<FieldType>,
    label: Label,
    number: u32,
    default: Option<DefaultValue>,
    has_default: bool,
    int_fmt: IntFmt,
    tag_delim: bool,
    packed: bool,
    packed_set: bool,
    lazy: bool,
    is_extension: bool,
    subdef: Option<String>,
    extendee: Option<String>,
    oneof: Option<String>,
}

/// Name of a resolved definition as an absolute symbol.
fn absolute(full_name: String) -> String
{
    format!(".{full_name}")
}

impl FieldCopy
{
    fn of_data(name: &Option<String>, f: &FieldData) -> Self
    {
        let by_name = |s: &Option<SymRef>| match s {
            Some(SymRef::Symbolic(name)) => Some(name.clone()),
            Some(SymRef::Direct(sub)) => sub_name(sub),
            None => None,
        };
        Self{
            name: name.clone(),
            field_type: f.field_type,
            label: f.label,
            number: f.number,
            default: f.default.clone(),
            has_default: f.has_default,
            int_fmt: f.int_fmt,
            tag_delim: f.tag_delim,
            packed: f.packed,
            packed_set: f.packed_set,
            lazy: f.lazy,
            is_extension: f.is_extension,
            subdef: match &f.subdef {
                Some(SymRef::Direct(sub)) => sub_name(sub).map(absolute),
                other => by_name(other),
            },
            extendee: if f.is_extension { by_name(&f.containing) } else { None },
            oneof: f.oneof.as_ref().and_then(sub_name),
        }
    }

    fn of_view(f: &FieldView) -> Self
    {
        let extendee = match f.is_extension() {
            true => f.containing_type()
                .and_then(|m| m.full_name().map(str::to_owned))
                .or_else(|| f.containing_type_name().map(str::to_owned)),
            false => None,
        };
        Self{
            name: f.name().map(str::to_owned),
            field_type: Some(f.field_type()),
            label: f.label(),
            number: f.number(),
            default: f.default_value().cloned(),
            has_default: true,
            int_fmt: f.int_fmt(),
            tag_delim: f.is_tag_delimited(),
            packed: f.packed(),
            packed_set: f.packed(),
            lazy: f.lazy(),
            is_extension: f.is_extension(),
            subdef: f.subdef().and_then(|s| s.full_name().map(|n| absolute(n.to_owned()))),
            extendee,
            oneof: f.oneof().and_then(|o| o.name().map(str::to_owned)),
        }
    }

    fn of_sub(sub: &SubRef<DefData>) -> Result<Self>
    {
        if let Some(view) = sub.as_frozen().and_then(|h| DefView(h).as_field()) {
            return Ok(Self::of_view(&view));
        }
        let obj = sub.as_mutable().ok_or(crate::Error::Frozen)?;
        obj.with(|d| match &d.kind {
            DefKind::Field(f) => Self::of_data(&d.name, f),
            _ => unreachable!("Message members are fields"),
        })
    }

    fn build(self) -> FieldDef
    {
        let data = FieldData{
            field_type: self.field_type,
            label: self.label,
            number: self.number,
            default: self.default,
            has_default: self.has_default,
            containing: self.extendee.map(SymRef::Symbolic),
            subdef: self.subdef.map(SymRef::Symbolic),
            oneof: None,
            int_fmt: self.int_fmt,
            tag_delim: self.tag_delim,
            packed: self.packed,
            packed_set: self.packed_set,
            lazy: self.lazy,
            is_extension: self.is_extension,
            index: 0,
            selector_base: 0,
        };
        let mut def = DefData::new(DefKind::Field(data));
        def.name = self.name;
        FieldDef(Ref::new(def, Owner::UNTRACKED))
    }
}

/// Copy `def`, frozen or not.
pub (super) fn dup(def: &Def) -> Result<Def>
{
    if let Some(view) = def.view() {
        return dup_view(&view);
    }

    enum Source
    {
        Msg{name: Option<String>, map_entry: bool, fields: Vec<SubRef<DefData>>, oneofs: Vec<String>},
        Field(FieldCopy),
        Enum{name: Option<String>, values: Vec<(String, i32)>, default: Option<i32>},
        Oneof{name: Option<String>, fields: Vec<SubRef<DefData>>},
    }

    let source = def.0.with(|d| match &d.kind {
        DefKind::Msg(m) => Source::Msg{
            name: d.name.clone(),
            map_entry: m.map_entry,
            fields: m.fields.clone(),
            oneofs: m.oneofs.iter().filter_map(sub_name).collect(),
        },
        DefKind::Field(f) => Source::Field(FieldCopy::of_data(&d.name, f)),
        DefKind::Enum(e) => Source::Enum{
            name: d.name.clone(),
            values: e.values.clone(),
            default: e.default,
        },
        DefKind::Oneof(o) => Source::Oneof{name: d.name.clone(), fields: o.fields.clone()},
    })?;

    match source {
        Source::Msg{name, map_entry, fields, oneofs} => {
            let fields = fields.iter().map(FieldCopy::of_sub).collect::<Result<_>>()?;
            Ok(build_message(name, map_entry, oneofs, fields)?.into())
        },
        Source::Field(copy) => Ok(copy.build().into()),
        Source::Enum{name, values, default} => Ok(build_enum(name, &values, default)?.into()),
        Source::Oneof{name, fields} => {
            let fields = fields.iter().map(FieldCopy::of_sub).collect::<Result<_>>()?;
            Ok(build_oneof(name, fields)?.into())
        },
    }
}

pub (super) fn dup_view(view: &DefView) -> Result<Def>
{
    if let Some(m) = view.as_message() {
        let oneofs = m.oneofs().filter_map(|o| o.name().map(str::to_owned)).collect();
        let fields = m.fields().map(|f| FieldCopy::of_view(&f)).collect();
        let name = m.full_name().map(str::to_owned);
        return Ok(build_message(name, m.is_map_entry(), oneofs, fields)?.into());
    }
    if let Some(f) = view.as_field() {
        return Ok(FieldCopy::of_view(&f).build().into());
    }
    if let Some(e) = view.as_enum() {
        let values: Vec<_> = e.values().map(|(n, v)| (n.to_owned(), v)).collect();
        let name = e.full_name().map(str::to_owned);
        return Ok(build_enum(name, &values, Some(e.default_value()))?.into());
    }
    let o = view.as_oneof().expect("Every definition has one of four kinds");
    let fields = o.fields().map(|f| FieldCopy::of_view(&f)).collect();
    Ok(build_oneof(o.name().map(str::to_owned), fields)?.into())
}

fn build_message(
    name: Option<String>,
    map_entry: bool,
    oneofs: Vec<String>,
    fields: Vec<FieldCopy>,
) -> Result<MessageDef>
{
    let msg = MessageDef::new();
    if let Some(name) = name {
        msg.set_full_name(&name)?;
    }
    msg.set_map_entry(map_entry)?;

    let mut new_oneofs = Vec::with_capacity(oneofs.len());
    for name in oneofs {
        let oneof = OneofDef::named(&name)?;
        msg.add_oneof(&oneof)?;
        new_oneofs.push((name, oneof));
    }
    for mut copy in fields {
        let oneof = copy.oneof.take()
            .and_then(|n| new_oneofs.iter().find(|(name, _)| *name == n))
            .map(|(_, o)| o);
        let field = copy.build();
        match oneof {
            Some(oneof) => oneof.add_field(&field)?,
            None => msg.add_field(&field)?,
        }
    }
    Ok(msg)
}

fn build_enum(name: Option<String>, values: &[(String, i32)], default: Option<i32>)
    -> Result<EnumDef>
{
    let e = EnumDef::new();
    if let Some(name) = name {
        e.set_full_name(&name)?;
    }
    for (value, number) in values {
        e.add_value(value, *number)?;
    }
    if let Some(default) = default {
        e.set_default(default)?;
    }
    Ok(e)
}

fn build_oneof(name: Option<String>, fields: Vec<FieldCopy>) -> Result<OneofDef>
{
    let oneof = OneofDef::new();
    if let Some(name) = name {
        oneof.set_name(&name)?;
    }
    for mut copy in fields {
        copy.oneof = None;
        oneof.add_field(&copy.build())?;
    }
    Ok(oneof)
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::def::freeze};

    #[test]
    fn subdefs_become_symbolic()
    {
        let sub = MessageDef::named("pkg.Sub").unwrap();
        let anon = MessageDef::new();
        let m = MessageDef::named("pkg.M").unwrap();
        let named = FieldDef::named("named", 1, FieldType::Message).unwrap();
        named.set_subdef(&sub.as_def()).unwrap();
        let unnamed = FieldDef::named("unnamed", 2, FieldType::Message).unwrap();
        unnamed.set_subdef(&anon.as_def()).unwrap();
        m.add_field(&named).unwrap();
        m.add_field(&unnamed).unwrap();

        let copy = m.dup().unwrap();
        assert_eq!(copy.full_name().as_deref(), Some("pkg.M"));
        assert_eq!(copy.field_count(), 2);
        let f = copy.field_by_name("named").unwrap();
        assert_eq!(f.subdef_name().as_deref(), Some(".pkg.Sub"));
        assert!(!copy.obj().same_group(sub.obj()));
        assert_eq!(copy.field_by_name("unnamed").unwrap().subdef_name(), None);
    }

    #[test]
    fn frozen_copies_are_mutable()
    {
        let e = EnumDef::named("E").unwrap();
        e.add_value("A", 1).unwrap();
        e.add_value("B", 2).unwrap();
        e.set_default(2).unwrap();
        let m = MessageDef::named("M").unwrap();
        let o = OneofDef::named("o").unwrap();
        let f = FieldDef::named("f", 3, FieldType::Enum).unwrap();
        f.set_subdef(&e.as_def()).unwrap();
        o.add_field(&f).unwrap();
        m.add_oneof(&o).unwrap();
        freeze(&[m.as_def(), e.as_def()]).unwrap();

        let copy = m.dup().unwrap();
        assert!(!copy.is_frozen());
        let f = copy.field_by_number(3).unwrap();
        assert_eq!(f.subdef_name().as_deref(), Some(".E"));
        assert!(copy.oneof_by_name("o").unwrap().field_by_name("f").is_some());

        let e2 = e.as_def().dup().unwrap().as_enum().unwrap();
        assert_eq!(e2.default_value(), Some(2));
        assert_eq!(e2.name_of(1).as_deref(), Some("A"));
    }
}
