use {
    super::compile::{CompileOptions, Program, compile},
    crate::{Result, handlers::HandlersView},
    rime_table::IntTable,
    std::sync::Arc,
};

/// Memoized programs, keyed by the handler table they were compiled for.
///
/// The cache keeps the tables alive so their addresses stay unique.
pub struct CodeCache
{
    options: CompileOptions,
    programs: IntTable<(HandlersView, Arc<Program>)>,
}

impl CodeCache
{
    /// Create an empty cache compiling with `options`.
    pub fn new(options: CompileOptions) -> Self
    {
        Self{options, programs: IntTable::new()}
    }

    /// Options programs are compiled with.
    pub fn options(&self) -> CompileOptions
    {
        self.options
    }

    /// Number of programs in the cache.
    pub fn len(&self) -> usize
    {
        self.programs.iter().count()
    }

    /// Whether no program has been compiled yet.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// The program for `handlers`, compiling it on first use.
    pub fn get(&mut self, handlers: &HandlersView) -> Result<Arc<Program>>
    {
        if let Some((_, program)) = self.programs.lookup(handlers.addr()) {
            return Ok(program.clone());
        }
        let program = Arc::new(compile(handlers, self.options)?);
        self.programs.insert(handlers.addr(), (handlers.clone(), program.clone()))?;
        Ok(program)
    }
}

impl Default for CodeCache
{
    fn default() -> Self
    {
        Self::new(CompileOptions::default())
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{def::{FieldDef, FieldType, MessageDef, freeze}, handlers::Handlers},
    };

    #[test]
    fn programs_are_memoized()
    {
        let m = MessageDef::named("M").unwrap();
        m.add_field(&FieldDef::named("a", 1, FieldType::Bool).unwrap()).unwrap();
        let m = freeze(&[m.as_def()]).unwrap()[0].as_message().unwrap();
        let h1 = Handlers::new_frozen(&m, |_| Ok(())).unwrap();
        let h2 = Handlers::new_frozen(&m, |_| Ok(())).unwrap();

        let mut cache = CodeCache::default();
        let p1 = cache.get(&h1).unwrap();
        assert!(Arc::ptr_eq(&p1, &cache.get(&h1).unwrap()));
        assert!(!Arc::ptr_eq(&p1, &cache.get(&h2).unwrap()));
        assert_eq!(cache.len(), 2);
    }
}
