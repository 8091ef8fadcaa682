use {
    super::{
        Def, DefData, DefKind, DefView, DefaultValue, EnumData, FieldData,
        FieldType, FrozenKind, Label, MsgData, MsgLayout, SymRef,
    },
    crate::{
        Error, Result,
        handlers::STATIC_SELECTOR_COUNT,
        refcounted::{MAX_SCHEMA_DEPTH, Obj, Plan, SubRef},
    },
    rime_table::IntTable,
};

/// Freeze a closed set of definitions.
///
/// Every message and enum reachable from `defs` that is not yet frozen
/// must be in `defs`; fields and oneofs are frozen with their message.
/// On failure no definition is modified.
pub fn freeze(defs: &[Def]) -> Result<Vec<DefView>>
{
    freeze_with_depth(defs, MAX_SCHEMA_DEPTH)
}

/// Like [`freeze`], with a custom bound on the depth of the schema graph.
pub fn freeze_with_depth(defs: &[Def], max_depth: usize) -> Result<Vec<DefView>>
{
    let roots: Vec<_> = defs.iter().map(|d| d.obj().clone()).collect();
    let plan = Plan::new(&roots, max_depth)?;

    let mut listed = IntTable::new();
    for root in &roots {
        let _ = listed.insert(root.addr(), ());
    }

    let mut updates = Vec::new();
    for obj in plan.objects() {
        let data = obj.data().ok_or(Error::Frozen)?;
        let name = || data.name.clone().unwrap_or_default();
        match &data.kind {
            DefKind::Msg(m) => {
                if !listed.contains(obj.addr()) {
                    return Err(Error::ClosureIncomplete);
                }
                lay_out(obj, m, &mut updates)?;
            },
            DefKind::Enum(e) => {
                if !listed.contains(obj.addr()) {
                    return Err(Error::ClosureIncomplete);
                }
                check_enum(&name(), e)?;
            },
            DefKind::Field(f) => {
                let (default, packed) = check_field(&name(), f)?;
                updates.push(Update::Field{obj: obj.clone(), default, packed});
            },
            DefKind::Oneof(_) => {
                if data.name.is_none() {
                    return Err(Error::InvalidField("oneof needs a name".into()));
                }
            },
        }
    }

    for update in updates {
        update.apply()?;
    }
    Ok(plan.commit().into_iter().map(DefView).collect())
}

/// Change made to a definition once the whole set is known to be valid.
enum Update
{
    Msg{obj: Obj<DefData>, layout: MsgLayout},
    Selectors{obj: Obj<DefData>, index: u32, selector_base: u32},
    Field{obj: Obj<DefData>, default: Option<DefaultValue>, packed: bool},
}

impl Update
{
    fn apply(self) -> Result<()>
    {
        match self {
            Update::Msg{obj, layout} => obj.with_mut(|d| {
                if let DefKind::Msg(m) = &mut d.kind {
                    m.layout = Some(layout);
                }
            }),
            Update::Selectors{obj, index, selector_base} => obj.with_mut(|d| {
                if let DefKind::Field(f) = &mut d.kind {
                    f.index = index;
                    f.selector_base = selector_base;
                }
            }),
            Update::Field{obj, default, packed} => obj.with_mut(|d| {
                if let DefKind::Field(f) = &mut d.kind {
                    f.default = default;
                    f.packed = packed;
                }
            }),
        }
    }
}

/// Number of selectors a field takes after its base,
/// and the offset of the base from the first of them.
pub (crate) fn selector_span(field_type: FieldType, repeated: bool, lazy: bool) -> (u32, u32)
{
    let seq = if repeated { 2 } else { 0 };
    let own = match field_type {
        FieldType::String | FieldType::Bytes => 3,
        FieldType::Message if lazy => 4,
        _ => 1,
    };
    (seq + own, seq)
}

fn lay_out(obj: &Obj<DefData>, m: &MsgData, updates: &mut Vec<Update>) -> Result<()>
{
    struct Info
    {
        obj: Obj<DefData>,
        field_type: FieldType,
        number: u32,
        repeated: bool,
        lazy: bool,
    }

    let mut infos = Vec::with_capacity(m.fields.len());
    for sub in &m.fields {
        let field = sub.as_mutable().ok_or(Error::Frozen)?;
        let info = field.with(|d| match &d.kind {
            DefKind::Field(f) => f.field_type.map(|field_type| Info{
                obj: field.clone(),
                field_type,
                number: f.number,
                repeated: f.label == Label::Repeated,
                lazy: f.lazy,
            }),
            _ => unreachable!("Message members are fields"),
        })?;
        infos.push(info.ok_or_else(|| Error::InvalidField("field needs a type".into()))?);
    }

    let mut order: Vec<usize> = (0 .. infos.len()).collect();
    order.sort_by_key(|&i| (infos[i].field_type != FieldType::Message, infos[i].number));

    let submsg_field_count = infos.iter()
        .filter(|i| i.field_type == FieldType::Message)
        .count() as u32;
    let mut selector_count = STATIC_SELECTOR_COUNT + submsg_field_count;
    for (index, &i) in order.iter().enumerate() {
        let info = &infos[i];
        let (span, offset) = selector_span(info.field_type, info.repeated, info.lazy);
        updates.push(Update::Selectors{
            obj: info.obj.clone(),
            index: index as u32,
            selector_base: selector_count + offset,
        });
        selector_count += span;
    }

    updates.push(Update::Msg{
        obj: obj.clone(),
        layout: MsgLayout{order, selector_count, submsg_field_count},
    });
    Ok(())
}

fn check_enum(name: &str, e: &EnumData) -> Result<()>
{
    match e.default_is_valid() {
        true => Ok(()),
        false => Err(Error::InvalidField(format!("enum {name} has no valid default"))),
    }
}

/// Validate a field, returning its final default and packing.
fn check_field(name: &str, f: &FieldData) -> Result<(Option<DefaultValue>, bool)>
{
    let invalid = |why: &str| Error::InvalidField(format!("field {name}: {why}"));

    let field_type = f.field_type.ok_or_else(|| invalid("no type"))?;
    if f.number == 0 || name.is_empty() {
        return Err(invalid("no name or number"));
    }
    match &f.containing {
        Some(SymRef::Symbolic(target)) if !f.is_extension =>
            return Err(Error::UnresolvedSymbol(target.clone())),
        _ => (),
    }

    let subdef = match (&f.subdef, field_type) {
        (Some(SymRef::Symbolic(target)), _) => return Err(Error::UnresolvedSymbol(target.clone())),
        (Some(SymRef::Direct(sub)), _) => Some(sub),
        (None, FieldType::Message | FieldType::Enum) => return Err(invalid("no subdef")),
        (None, _) => None,
    };

    let repeated_primitive = f.label == Label::Repeated && field_type.is_primitive();
    if f.packed_set && f.packed && !repeated_primitive {
        return Err(invalid("only repeated primitive fields may be packed"));
    }
    if f.lazy && (field_type != FieldType::Message || f.tag_delim) {
        return Err(invalid("only length-delimited message fields may be lazy"));
    }

    let default = match (field_type, &f.default, subdef) {
        (FieldType::Enum, Some(DefaultValue::EnumName(value)), Some(sub)) => {
            let number = enum_value(sub, Some(value))?
                .ok_or_else(|| invalid(&format!("no enum value {value}")))?;
            Some(DefaultValue::Int32(number))
        },
        (FieldType::Enum, _, Some(sub)) if !f.has_default =>
            Some(DefaultValue::Int32(enum_value(sub, None)?.unwrap_or(0))),
        (_, default, _) => default.clone(),
    };
    Ok((default, f.packed && repeated_primitive))
}

/// Number of the named value of an enum, or its default without a name.
fn enum_value(sub: &SubRef<DefData>, name: Option<&str>) -> Result<Option<i32>>
{
    if let Some(handle) = sub.as_frozen() {
        return Ok(match &handle.get().kind {
            FrozenKind::Enum(e) => match name {
                Some(name) => e.ntoi.lookup(name).copied(),
                None => Some(e.default),
            },
            _ => None,
        });
    }
    let obj = sub.as_mutable().ok_or(Error::Frozen)?;
    obj.with(|d| match &d.kind {
        DefKind::Enum(e) => match name {
            Some(name) => e.ntoi.lookup(name).copied(),
            None => e.default,
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::def::{EnumDef, FieldDef, MessageDef},
    };

    fn message_with_sub(name: &str, field: &str, sub: &MessageDef) -> MessageDef
    {
        let m = MessageDef::named(name).unwrap();
        let f = FieldDef::named(field, 1, FieldType::Message).unwrap();
        f.set_subdef(&sub.as_def()).unwrap();
        m.add_field(&f).unwrap();
        m
    }

    #[test]
    fn cycle_freezes_only_together()
    {
        let a = MessageDef::named("MessageA").unwrap();
        let b = message_with_sub("MessageB", "field_a", &a);
        let fb = FieldDef::named("field_b", 1, FieldType::Message).unwrap();
        fb.set_subdef(&b.as_def()).unwrap();
        a.add_field(&fb).unwrap();

        assert_eq!(freeze(&[a.as_def()]).unwrap_err(), Error::ClosureIncomplete);
        assert_eq!(freeze(&[b.as_def()]).unwrap_err(), Error::ClosureIncomplete);
        assert!(!a.is_frozen() && !b.is_frozen());

        let views = freeze(&[a.as_def(), b.as_def()]).unwrap();
        let a = views[0].as_message().unwrap();
        let b = views[1].as_message().unwrap();
        let to_b = a.field_by_name("field_b").unwrap().message_subdef().unwrap();
        assert!(to_b.ptr_eq(&b));
        let back = b.field(0).unwrap().message_subdef().unwrap();
        assert!(back.ptr_eq(&a));
    }

    #[test]
    fn layout_puts_submessages_first()
    {
        let sub = MessageDef::named("Sub").unwrap();
        let m = MessageDef::named("M").unwrap();
        let x = FieldDef::named("x", 1, FieldType::Int32).unwrap();
        let s = FieldDef::named("s", 2, FieldType::String).unwrap();
        s.set_label(Label::Repeated).unwrap();
        let y = FieldDef::named("y", 3, FieldType::Message).unwrap();
        y.set_subdef(&sub.as_def()).unwrap();
        for f in [&x, &s, &y] {
            m.add_field(f).unwrap();
        }

        let views = freeze(&[m.as_def(), sub.as_def()]).unwrap();
        let m = views[0].as_message().unwrap();
        assert_eq!(m.submsg_field_count(), 1);
        let names: Vec<_> = (0 .. 3).map(|i| m.field(i).unwrap().name().unwrap().to_owned()).collect();
        assert_eq!(names, ["y", "x", "s"]);
        let numbers: Vec<_> = m.fields().map(|f| f.number()).collect();
        assert_eq!(numbers, [1, 2, 3]);

        // Static selectors, one start-submessage selector, then the fields.
        assert_eq!(m.field_by_name("y").unwrap().selector_base(), 3);
        assert_eq!(m.field_by_name("x").unwrap().selector_base(), 4);
        assert_eq!(m.field_by_name("s").unwrap().selector_base(), 7);
        assert_eq!(m.selector_count(), 10);
    }

    #[test]
    fn enum_defaults_resolve()
    {
        let e = EnumDef::named("E").unwrap();
        e.add_value("A", 4).unwrap();
        e.add_value("B", 9).unwrap();
        let m = MessageDef::named("M").unwrap();
        let plain = FieldDef::named("plain", 1, FieldType::Enum).unwrap();
        plain.set_subdef(&e.as_def()).unwrap();
        let named = FieldDef::named("named", 2, FieldType::Enum).unwrap();
        named.set_subdef(&e.as_def()).unwrap();
        named.set_default(DefaultValue::EnumName("B".into())).unwrap();
        m.add_field(&plain).unwrap();
        m.add_field(&named).unwrap();

        let views = freeze(&[m.as_def(), e.as_def()]).unwrap();
        let m = views[0].as_message().unwrap();
        let default = |n| m.field_by_name(n).unwrap().default_value().cloned();
        assert_eq!(default("plain"), Some(DefaultValue::Int32(4)));
        assert_eq!(default("named"), Some(DefaultValue::Int32(9)));
    }

    #[test]
    fn invalid_fields_change_nothing()
    {
        let m = MessageDef::named("M").unwrap();
        let s = FieldDef::named("s", 1, FieldType::String).unwrap();
        s.set_packed(true).unwrap();
        m.add_field(&s).unwrap();
        assert!(matches!(freeze(&[m.as_def()]), Err(Error::InvalidField(_))));
        assert!(!m.is_frozen());

        s.set_packed(false).unwrap();
        let unresolved = FieldDef::named("u", 2, FieldType::Message).unwrap();
        unresolved.set_subdef_name("pkg.Missing").unwrap();
        m.add_field(&unresolved).unwrap();
        assert_eq!(
            freeze(&[m.as_def()]).unwrap_err(),
            Error::UnresolvedSymbol("pkg.Missing".into()),
        );
    }

    #[test]
    fn enum_needs_valid_default()
    {
        let e = EnumDef::named("E").unwrap();
        assert!(freeze(&[e.as_def()]).is_err());
        e.add_value("A", 1).unwrap();
        e.set_default(2).unwrap();
        assert!(freeze(&[e.as_def()]).is_err());
        e.set_default(1).unwrap();
        let views = freeze(&[e.as_def()]).unwrap();
        assert_eq!(views[0].as_enum().unwrap().default_value(), 1);
    }
}
