//! Registry of frozen definitions by full name.

use {
    crate::{
        Error, Result,
        def::{
            Def, DefData, DefKind, DefType, DefView, EnumView, FieldType, MessageView, SymRef,
            freeze,
        },
        refcounted::{Obj, SubRef},
    },
    rime_table::StrTable,
    scope_exit::guard,
    std::{cell::RefCell, sync::{Mutex, MutexGuard, OnceLock}},
    tracing::debug,
};

/// Frozen definitions by full name.
///
/// Definitions are added in batches, each of which either fully succeeds
/// or leaves the table unchanged. Once [`freeze`] is called,
/// the table no longer changes and lookups take no lock.
///
/// [`freeze`]: `Self::freeze`
#[derive(Default)]
pub struct SymbolTable
{
    table: Mutex<StrTable<DefView>>,
    frozen: OnceLock<StrTable<DefView>>,
}

/// Target of a symbol resolved during [`SymbolTable::add`].
enum Target
{
    Batch(Def),
    Table(DefView),
}

impl SymbolTable
{
    /// Create an empty table.
    pub fn new() -> Self
    {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<StrTable<DefView>>
    {
        // Batches are swapped in whole, so a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_table<R>(&self, f: impl FnOnce(&StrTable<DefView>) -> R) -> R
    {
        match self.frozen.get() {
            Some(table) => f(table),
            None => f(&self.locked()),
        }
    }

    /// Number of definitions.
    pub fn count(&self) -> usize
    {
        self.with_table(StrTable::count)
    }

    /// Definition with the given full name.
    pub fn lookup(&self, name: &str) -> Option<DefView>
    {
        self.with_table(|t| t.lookup(name).cloned())
    }

    /// Message with the given full name.
    pub fn lookup_message(&self, name: &str) -> Option<MessageView>
    {
        self.lookup(name)?.as_message()
    }

    /// Enum with the given full name.
    pub fn lookup_enum(&self, name: &str) -> Option<EnumView>
    {
        self.lookup(name)?.as_enum()
    }

    /// Resolve `sym` as referenced from within the scope `base`.
    ///
    /// A leading `.` makes `sym` absolute. Otherwise `sym` is looked up
    /// in `base`, then in each enclosing scope up to the root.
    pub fn resolve(&self, base: &str, sym: &str) -> Option<DefView>
    {
        self.with_table(|t| resolve_with(base, sym, |name| t.lookup(name).cloned()))
    }

    /// Definitions of the given kinds.
    pub fn iter(&self, filter: DefType) -> Vec<DefView>
    {
        self.with_table(|t| {
            t.iter()
                .map(|(_, def)| def)
                .filter(|def| filter.contains(def.def_type()))
                .cloned()
                .collect()
        })
    }

    /// Stop accepting definitions.
    ///
    /// Lookups on a frozen table take no lock.
    pub fn freeze(&self)
    {
        let snapshot = self.locked().clone();
        let _ = self.frozen.set(snapshot);
    }

    /// Whether [`freeze`] was called.
    ///
    /// [`freeze`]: `Self::freeze`
    pub fn is_frozen(&self) -> bool
    {
        self.frozen.get().is_some()
    }

    /// Resolve, freeze and add a batch of mutable definitions.
    ///
    /// Definitions replace those with the same name. Definitions already in
    /// the table that refer to a replaced name are copied and added again,
    /// so every definition in the table refers to the current one.
    ///
    /// On failure the table is unchanged.
    pub fn add(&self, defs: &[Def]) -> Result<()>
    {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        let result = self.add_batch(defs);
        debug!(batch = defs.len(), ok = result.is_ok(), "adding definitions");
        result
    }

    fn add_batch(&self, defs: &[Def]) -> Result<()>
    {
        let mut table = self.locked();
        if self.is_frozen() {
            return Err(Error::Frozen);
        }

        let mut batch: Vec<Def> = Vec::with_capacity(defs.len());
        let mut names: StrTable<usize> = StrTable::new();
        for def in defs {
            let name = def.full_name().filter(|n| !n.is_empty())
                .ok_or_else(|| Error::InvalidName(String::new()))?;
            def.obj().with(|_| ())?;
            if names.contains(&name) {
                return Err(Error::NameConflict(name));
            }
            names.insert(&name, batch.len())?;
            batch.push(def.clone());
        }

        for def in &batch {
            def.obj().with_mut(|d| d.came_from_user = true)?;
        }
        let user: Vec<Def> = batch.clone();
        let _clear = guard(move || {
            for def in &user {
                let _ = def.obj().with_mut(|d| d.came_from_user = false);
            }
        });

        self.dup_dependents(&table, &mut batch, &mut names)?;

        // Symbols resolved so far go back to being symbolic if the batch fails.
        let resolved = RefCell::new(Vec::<(Obj<DefData>, String)>::new());
        let restore = guard(|| {
            for (field, sym) in resolved.borrow_mut().drain(..) {
                let _ = field.with_mut(|d| {
                    if let DefKind::Field(f) = &mut d.kind {
                        f.subdef = Some(SymRef::Symbolic(sym));
                    }
                });
            }
        });
        resolve_batch(&batch, &names, &table, &mut resolved.borrow_mut())?;
        let views = freeze(&batch)?;
        restore.dismiss();

        let mut updated = table.clone();
        for view in views {
            let name = view.full_name().unwrap_or_default().to_owned();
            if updated.replace(&name, view.clone()).is_none() {
                updated.insert(&name, view)?;
            }
        }
        *table = updated;
        Ok(())
    }

    /// Copy every definition in `existing` that refers,
    /// directly or through other copies, to a name in the batch.
    fn dup_dependents(
        &self,
        existing: &StrTable<DefView>,
        batch: &mut Vec<Def>,
        names: &mut StrTable<usize>,
    ) -> Result<()>
    {
        if !existing.iter().any(|(name, _)| names.contains(name)) {
            return Ok(());
        }
        loop {
            let mut added = false;
            for (name, view) in existing.iter() {
                if names.contains(name) {
                    continue;
                }
                let Some(msg) = view.as_message() else { continue };
                let refers = msg.fields().any(|f| {
                    f.subdef()
                        .and_then(|s| s.full_name().map(|n| names.contains(n)))
                        .unwrap_or(false)
                });
                if refers {
                    let copy = view.dup()?;
                    names.insert(name, batch.len())?;
                    batch.push(copy);
                    added = true;
                }
            }
            if !added {
                return Ok(());
            }
        }
    }
}

/// Resolve every symbolic subdef reachable from the batch.
///
/// Each field resolved is recorded in `resolved` with the symbol it had.
fn resolve_batch(
    batch: &[Def],
    names: &StrTable<usize>,
    table: &StrTable<DefView>,
    resolved: &mut Vec<(Obj<DefData>, String)>,
) -> Result<()>
{
    for def in batch {
        let (base, fields) = match (def.as_message(), def.as_field()) {
            (Some(m), _) => {
                let fields = m.with(|_, d| {
                    d.fields.iter().filter_map(|s| s.as_mutable().cloned()).collect::<Vec<_>>()
                })?;
                (m.full_name().unwrap_or_default(), fields)
            },
            (None, Some(f)) => (String::new(), vec![f.obj().clone()]),
            (None, None) => continue,
        };

        for field in fields {
            let symbol = field.with(|d| match &d.kind {
                DefKind::Field(f) => match &f.subdef {
                    Some(SymRef::Symbolic(sym)) => Some((sym.clone(), f.field_type)),
                    _ => None,
                },
                _ => None,
            })?;
            let Some((sym, field_type)) = symbol else { continue };
            let wanted = match field_type {
                Some(FieldType::Enum) => DefType::ENUM,
                _ => DefType::MSG,
            };

            let target = resolve_with(&base, &sym, |name| match names.lookup(name) {
                Some(&i) => Some(Target::Batch(batch[i].clone())),
                None => table.lookup(name).cloned().map(Target::Table),
            }).ok_or_else(|| Error::UnresolvedSymbol(sym.clone()))?;

            let (kind, sub) = match target {
                Target::Batch(def) => (def.def_type()?, SubRef::new(&field, def.obj())),
                Target::Table(view) => (view.def_type(), SubRef::frozen(view.0)),
            };
            if kind != wanted {
                return Err(Error::InvalidField(format!("{sym} is not a {wanted:?}")));
            }
            field.with_mut(|d| {
                if let DefKind::Field(f) = &mut d.kind {
                    f.subdef = Some(SymRef::Direct(sub));
                }
            })?;
            resolved.push((field, sym));
        }
    }
    Ok(())
}

/// Scoped lookup of `sym` from `base` through `lookup`.
fn resolve_with<T>(base: &str, sym: &str, mut lookup: impl FnMut(&str) -> Option<T>)
    -> Option<T>
{
    if let Some(absolute) = sym.strip_prefix('.') {
        return lookup(absolute);
    }
    let mut scope = base;
    loop {
        let candidate = match scope {
            "" => sym.to_owned(),
            _ => format!("{scope}.{sym}"),
        };
        if let Some(found) = lookup(&candidate) {
            return Some(found);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope.rfind('.').map_or("", |i| &scope[.. i]);
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::def::{FieldDef, MessageDef},
    };

    fn message(name: &str, fields: &[(&str, u32, &str)]) -> MessageDef
    {
        let m = MessageDef::named(name).unwrap();
        for &(field, number, sub) in fields {
            let f = match sub {
                "" => FieldDef::named(field, number, FieldType::Int32).unwrap(),
                sub => {
                    let f = FieldDef::named(field, number, FieldType::Message).unwrap();
                    f.set_subdef_name(sub).unwrap();
                    f
                },
            };
            m.add_field(&f).unwrap();
        }
        m
    }

    #[test]
    fn resolve_scopes()
    {
        let t = SymbolTable::new();
        t.add(&[
            message("a.b.C", &[]).as_def(),
            message("a.C", &[]).as_def(),
            message("C", &[]).as_def(),
        ]).unwrap();
        let name = |v: Option<DefView>| v.and_then(|v| v.full_name().map(str::to_owned));
        assert_eq!(name(t.resolve("a.b.M", "C")).as_deref(), Some("a.b.C"));
        assert_eq!(name(t.resolve("a.M", "C")).as_deref(), Some("a.C"));
        assert_eq!(name(t.resolve("a.b.M", ".C")).as_deref(), Some("C"));
        assert_eq!(name(t.resolve("x", "b.C")).as_deref(), None);
        assert_eq!(name(t.resolve("a.x", "b.C")).as_deref(), Some("a.b.C"));
    }

    #[test]
    fn symbols_resolve_within_batch_and_table()
    {
        let t = SymbolTable::new();
        t.add(&[message("pkg.Leaf", &[("v", 1, "")]).as_def()]).unwrap();
        t.add(&[
            message("pkg.Root", &[("mid", 1, "Mid"), ("leaf", 2, "Leaf")]).as_def(),
            message("pkg.Mid", &[("leaf", 1, ".pkg.Leaf")]).as_def(),
        ]).unwrap();

        let root = t.lookup_message("pkg.Root").unwrap();
        let mid = root.field_by_name("mid").unwrap().message_subdef().unwrap();
        assert!(mid.ptr_eq(&t.lookup_message("pkg.Mid").unwrap()));
        let leaf = t.lookup_message("pkg.Leaf").unwrap();
        assert!(root.field_by_name("leaf").unwrap().message_subdef().unwrap().ptr_eq(&leaf));
        assert_eq!(t.iter(DefType::MSG).len(), 3);
        assert_eq!(t.iter(DefType::ENUM).len(), 0);
    }

    #[test]
    fn failed_batches_leave_table_unchanged()
    {
        let t = SymbolTable::new();
        t.add(&[message("M", &[("x", 1, "")]).as_def()]).unwrap();
        let before = t.lookup("M").unwrap();

        // Two fields named "x" cannot even share a message.
        let m = message("N", &[("x", 1, "")]);
        let x2 = FieldDef::named("x", 2, FieldType::Int32).unwrap();
        assert_eq!(m.add_field(&x2), Err(Error::NameConflict("x".into())));

        let dup = message("N", &[]);
        assert_eq!(t.add(&[m.as_def(), dup.as_def()]), Err(Error::NameConflict("N".into())));
        let missing = message("P", &[("q", 1, "Nowhere")]);
        assert_eq!(
            t.add(&[missing.as_def()]),
            Err(Error::UnresolvedSymbol("Nowhere".into())),
        );
        assert_eq!(t.count(), 1);
        assert!(t.lookup("N").is_none() && t.lookup("P").is_none());
        assert!(t.lookup("M").unwrap().ptr_eq(&before));
        assert!(!m.is_frozen());
    }

    #[test]
    fn replacing_rewires_dependents()
    {
        let t = SymbolTable::new();
        t.add(&[
            message("Old", &[("v", 1, "")]).as_def(),
            message("User", &[("old", 1, "Old")]).as_def(),
        ]).unwrap();
        let user_before = t.lookup_message("User").unwrap();

        t.add(&[message("Old", &[("w", 2, "")]).as_def()]).unwrap();
        let user = t.lookup_message("User").unwrap();
        assert!(!user.ptr_eq(&user_before));
        let target = user.field_by_name("old").unwrap().message_subdef().unwrap();
        assert!(target.field_by_name("w").is_some());
        assert!(target.ptr_eq(&t.lookup_message("Old").unwrap()));
    }

    #[test]
    fn nested_names_survive_replacement()
    {
        let t = SymbolTable::new();
        t.add(&[
            message("p.Old", &[("v", 1, "")]).as_def(),
            message("p.p.Old", &[("x", 1, "")]).as_def(),
            message("p.User", &[("old", 1, ".p.Old")]).as_def(),
        ]).unwrap();

        t.add(&[message("p.Old", &[("w", 2, "")]).as_def()]).unwrap();
        let user = t.lookup_message("p.User").unwrap();
        let target = user.field_by_name("old").unwrap().message_subdef().unwrap();
        assert!(target.ptr_eq(&t.lookup_message("p.Old").unwrap()));
        assert!(target.field_by_name("w").is_some());
    }

    #[test]
    fn failed_freeze_keeps_symbolic_names()
    {
        let t = SymbolTable::new();
        t.add(&[message("pkg.Other", &[]).as_def()]).unwrap();

        let m = message("pkg.M", &[("sub", 1, "Other"), ("n", 2, "")]);
        m.field_by_name("n").unwrap().set_packed(true).unwrap();
        assert!(matches!(t.add(&[m.as_def()]), Err(Error::InvalidField(_))));
        let sub = m.field_by_name("sub").unwrap();
        assert_eq!(sub.subdef_name().as_deref(), Some("Other"));
        assert!(t.lookup("pkg.M").is_none());

        m.field_by_name("n").unwrap().set_packed(false).unwrap();
        t.add(&[m.as_def()]).unwrap();
        let sub = t.lookup_message("pkg.M").unwrap().field_by_name("sub").unwrap();
        assert!(sub.message_subdef().unwrap().ptr_eq(&t.lookup_message("pkg.Other").unwrap()));
    }

    #[test]
    fn concurrent_replacements_keep_dependents_current()
    {
        let t = SymbolTable::new();
        t.add(&[
            message("Old", &[("v", 1, "")]).as_def(),
            message("Leaf", &[("v", 1, "")]).as_def(),
            message("User", &[("old", 1, "Old"), ("leaf", 2, "Leaf")]).as_def(),
        ]).unwrap();

        std::thread::scope(|s| {
            for name in ["Old", "Leaf"] {
                let t = &t;
                s.spawn(move || {
                    for number in 1 .. 32 {
                        t.add(&[message(name, &[("v", number, "")]).as_def()]).unwrap();
                    }
                });
            }
        });

        let user = t.lookup_message("User").unwrap();
        for (field, name) in [("old", "Old"), ("leaf", "Leaf")] {
            let target = user.field_by_name(field).unwrap().message_subdef().unwrap();
            assert!(target.ptr_eq(&t.lookup_message(name).unwrap()));
        }
    }

    #[test]
    fn frozen_table_rejects_adds()
    {
        let t = SymbolTable::new();
        t.add(&[message("M", &[]).as_def()]).unwrap();
        t.freeze();
        assert_eq!(t.add(&[message("N", &[]).as_def()]), Err(Error::Frozen));
        assert!(t.lookup_message("M").is_some());
    }
}
