use {
    super::{DefData, DefKind, FieldDef, FrozenDef, MessageDef, SymRef, check_name, def_handle},
    crate::{
        Error, Result,
        refcounted::{Link, Owner, Ref, SubRef},
    },
    rime_table::{IntTable, StrTable},
};

pub (crate) struct OneofData
{
    pub fields: Vec<SubRef<DefData>>,
    pub ntof: StrTable<usize>,
    pub itof: IntTable<usize>,
    pub parent: Option<SubRef<DefData>>,
}

pub (crate) struct FrozenOneof
{
    pub fields: Vec<Link<FrozenDef>>,
    pub ntof: StrTable<usize>,
    pub itof: IntTable<usize>,
    pub parent: Option<Link<FrozenDef>>,
}

impl OneofData
{
    pub (super) fn freeze(self, link: &mut dyn FnMut(&SubRef<DefData>) -> Link<FrozenDef>)
        -> FrozenOneof
    {
        FrozenOneof{
            fields: self.fields.iter().map(&mut *link).collect(),
            ntof: self.ntof,
            itof: self.itof,
            parent: self.parent.as_ref().map(link),
        }
    }
}

/// Mutable handle to a oneof definition.
#[derive(Clone)]
pub struct OneofDef(pub (crate) Ref<DefData>);

def_handle!(OneofDef, OneofView, Oneof, OneofData);

impl OneofDef
{
    /// Create an anonymous oneof with no fields.
    pub fn new() -> Self
    {
        let data = OneofData{
            fields: Vec::new(),
            ntof: StrTable::new(),
            itof: IntTable::new(),
            parent: None,
        };
        OneofDef(Ref::new(DefData::new(DefKind::Oneof(data)), Owner::UNTRACKED))
    }

    /// Create a oneof with the given name.
    pub fn named(name: &str) -> Result<Self>
    {
        let oneof = Self::new();
        oneof.set_name(name)?;
        Ok(oneof)
    }

    /// Name of the oneof.
    pub fn name(&self) -> Option<String>
    {
        self.as_def().full_name()
    }

    /// Set the name of the oneof.
    ///
    /// Fails with [`Error::InvalidField`] once the oneof is in a message.
    pub fn set_name(&self, name: &str) -> Result<()>
    {
        check_name(name, false)?;
        self.with_mut(|n, o| {
            if o.parent.is_some() {
                return Err(Error::InvalidField(format!("cannot rename installed oneof {name}")));
            }
            *n = Some(name.to_owned());
            Ok(())
        })?
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize
    {
        match self.view() {
            Some(view) => view.field_count(),
            None => self.with(|_, o| o.fields.len()).unwrap_or(0),
        }
    }

    /// Message the oneof is in.
    pub fn containing_type(&self) -> Option<MessageDef>
    {
        self.with(|_, o| o.parent.as_ref().and_then(|p| p.as_mutable().cloned()))
            .ok().flatten()
            .map(|obj| MessageDef(obj.take_ref(Owner::UNTRACKED)))
    }

    /// Add a field to the oneof,
    /// and to the oneof's message if it is in one.
    ///
    /// Adding a field twice is a no-op.
    pub fn add_field(&self, field: &FieldDef) -> Result<()>
    {
        let sub = SubRef::Mutable(field.obj().clone());
        if self.with(|_, o| o.fields.iter().any(|s| s.ptr_eq(&sub)))? {
            return Ok(());
        }
        let parent = self.containing_type();

        let (name, number) = field.with(|def, d| -> Result<_> {
            if d.oneof.is_some() {
                return Err(Error::OwnedElsewhere);
            }
            if let Some(SymRef::Direct(containing)) = &d.containing {
                let ours = parent.as_ref()
                    .map_or(false, |p| containing.ptr_eq(&SubRef::Mutable(p.obj().clone())));
                if !ours {
                    return Err(Error::OwnedElsewhere);
                }
            }
            match (&def.name, d.number) {
                (Some(n), number) if number != 0 => Ok((n.clone(), number)),
                _ => Err(Error::InvalidField("field needs a name and number".into())),
            }
        })??;

        self.with_mut(|_, o| -> Result<()> {
            if o.ntof.contains(&name) {
                return Err(Error::NameConflict(name.clone()));
            }
            if o.itof.contains(number.into()) {
                return Err(Error::NumberConflict(number));
            }
            let index = o.fields.len();
            o.itof.insert(number.into(), index)?;
            if let Err(err) = o.ntof.insert(&name, index) {
                o.itof.remove(number.into());
                return Err(err.into());
            }
            o.fields.push(SubRef::new(self.obj(), field.obj()));
            Ok(())
        })??;
        let back = SubRef::new(field.obj(), self.obj());
        field.with_mut(|_, d| d.oneof = Some(back))?;

        if let Some(parent) = parent {
            if let Err(err) = parent.add_field(field) {
                self.with_mut(|_, o| {
                    o.fields.pop();
                    o.ntof.remove(&name);
                    o.itof.remove(number.into());
                })?;
                field.with_mut(|_, d| d.oneof = None)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<FieldDef>
    {
        self.with(|_, o| o.ntof.lookup(name).map(|&i| o.fields[i].clone()))
            .ok().flatten()
            .and_then(|s| s.as_mutable().map(|f| FieldDef(f.take_ref(Owner::UNTRACKED))))
    }

    /// Field with the given number.
    pub fn field_by_number(&self, number: u32) -> Option<FieldDef>
    {
        self.with(|_, o| o.itof.lookup(number.into()).map(|&i| o.fields[i].clone()))
            .ok().flatten()
            .and_then(|s| s.as_mutable().map(|f| FieldDef(f.take_ref(Owner::UNTRACKED))))
    }
}

impl Default for OneofDef
{
    fn default() -> Self
    {
        Self::new()
    }
}
