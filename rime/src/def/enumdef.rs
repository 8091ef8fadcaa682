use {
    super::{DefData, DefKind, check_name, def_handle},
    crate::{Error, Result, refcounted::{Owner, Ref}},
    rime_table::{IntTable, StrTable},
};

pub (crate) struct EnumData
{
    /// Values in the order they were added.
    pub values: Vec<(String, i32)>,
    pub ntoi: StrTable<i32>,
    pub iton: IntTable<String>,
    pub default: Option<i32>,
}

pub (crate) struct FrozenEnum
{
    pub values: Vec<(String, i32)>,
    pub ntoi: StrTable<i32>,
    pub iton: IntTable<String>,
    pub default: i32,
}

/// Table key of an enum number.
pub (crate) fn enum_key(number: i32) -> u64
{
    u64::from(number as u32)
}

impl EnumData
{
    pub (super) fn freeze(self) -> FrozenEnum
    {
        let mut iton = self.iton;
        let _ = iton.compact();
        FrozenEnum{
            values: self.values,
            ntoi: self.ntoi,
            iton,
            default: self.default.unwrap_or(0),
        }
    }

    /// Whether the default is one of the values.
    pub fn default_is_valid(&self) -> bool
    {
        match self.default {
            Some(n) => self.iton.contains(enum_key(n)),
            None => false,
        }
    }
}

/// Mutable handle to an enum definition.
#[derive(Clone)]
pub struct EnumDef(pub (crate) Ref<DefData>);

def_handle!(EnumDef, EnumView, Enum, EnumData);

impl EnumDef
{
    /// Create an anonymous enum with no values.
    pub fn new() -> Self
    {
        let data = EnumData{
            values: Vec::new(),
            ntoi: StrTable::new(),
            iton: IntTable::new(),
            default: None,
        };
        EnumDef(Ref::new(DefData::new(DefKind::Enum(data)), Owner::UNTRACKED))
    }

    /// Create an enum with the given full name.
    pub fn named(full_name: &str) -> Result<Self>
    {
        let e = Self::new();
        e.set_full_name(full_name)?;
        Ok(e)
    }

    /// Full name of the enum.
    pub fn full_name(&self) -> Option<String>
    {
        self.as_def().full_name()
    }

    /// Set the full name of the enum.
    pub fn set_full_name(&self, name: &str) -> Result<()>
    {
        check_name(name, true)?;
        self.with_mut(|n, _| *n = Some(name.to_owned()))
    }

    /// Add a value.
    ///
    /// Numbers may repeat; the first name added for a number
    /// is the one [`name_of`] returns.
    /// The first value added becomes the default.
    ///
    /// [`name_of`]: `Self::name_of`
    pub fn add_value(&self, name: &str, number: i32) -> Result<()>
    {
        check_name(name, false)?;
        self.with_mut(|_, e| -> Result<()> {
            if e.ntoi.contains(name) {
                return Err(Error::NameConflict(name.to_owned()));
            }
            let fresh = !e.iton.contains(enum_key(number));
            if fresh {
                e.iton.insert(enum_key(number), name.to_owned())?;
            }
            if let Err(err) = e.ntoi.insert(name, number) {
                if fresh {
                    e.iton.remove(enum_key(number));
                }
                return Err(err.into());
            }
            e.values.push((name.to_owned(), number));
            e.default.get_or_insert(number);
            Ok(())
        })?
    }

    /// Set the default value.
    ///
    /// The default must be one of the values by the time the enum is frozen.
    pub fn set_default(&self, number: i32) -> Result<()>
    {
        self.with_mut(|_, e| e.default = Some(number))
    }

    /// Default value.
    pub fn default_value(&self) -> Option<i32>
    {
        match self.view() {
            Some(view) => Some(view.default_value()),
            None => self.with(|_, e| e.default).ok().flatten(),
        }
    }

    /// Number of values, counting repeated numbers.
    pub fn value_count(&self) -> usize
    {
        match self.view() {
            Some(view) => view.value_count(),
            None => self.with(|_, e| e.values.len()).unwrap_or(0),
        }
    }

    /// Number of the value with the given name.
    pub fn number_of(&self, name: &str) -> Option<i32>
    {
        match self.view() {
            Some(view) => view.number_of(name),
            None => self.with(|_, e| e.ntoi.lookup(name).copied()).ok().flatten(),
        }
    }

    /// Name of the first value added with the given number.
    pub fn name_of(&self, number: i32) -> Option<String>
    {
        match self.view() {
            Some(view) => view.name_of(number).map(str::to_owned),
            None => self.with(|_, e| e.iton.lookup(enum_key(number)).cloned()).ok().flatten(),
        }
    }
}

impl Default for EnumDef
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn first_name_wins()
    {
        let e = EnumDef::named("pkg.Color").unwrap();
        e.add_value("RED", 1).unwrap();
        e.add_value("CRIMSON", 1).unwrap();
        e.add_value("BLUE", -2).unwrap();
        assert_eq!(e.add_value("RED", 3), Err(Error::NameConflict("RED".into())));
        assert_eq!(e.name_of(1).as_deref(), Some("RED"));
        assert_eq!(e.name_of(-2).as_deref(), Some("BLUE"));
        assert_eq!(e.number_of("CRIMSON"), Some(1));
        assert_eq!(e.value_count(), 3);
        assert_eq!(e.default_value(), Some(1));
    }
}
