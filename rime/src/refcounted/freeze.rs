use {
    super::{FrozenGroup, Group, Handle, Link, Obj, RefCounted, SubRef, collect},
    crate::{Error, Result},
    rime_table::IntTable,
    std::{cell::{Cell, RefCell}, rc::Rc, sync::Arc},
};

/// Default bound on the depth of the graph walked by a freeze.
pub const MAX_SCHEMA_DEPTH: usize = 64;

/// Most objects a single freeze may cover.
const MAX_OBJECTS: usize = 1 << 31;

/// Freeze every mutable object reachable from `roots`.
///
/// Returns the frozen handles of the roots, in order.
/// On failure no object is modified.
pub fn freeze<T>(roots: &[Obj<T>], max_depth: usize) -> Result<Vec<Handle<T::Frozen>>>
    where T: RefCounted
{
    Ok(Plan::new(roots, max_depth)?.commit())
}

/// Strongly connected components of a mutable graph, ready to freeze.
///
/// Planning does not modify any object,
/// so callers may validate the plan before committing to it.
pub struct Plan<T>
    where T: RefCounted
{
    roots: Vec<Obj<T>>,

    /// Components in reverse topological order:
    /// each component only references components before it.
    sccs: Vec<Vec<Obj<T>>>,
}

struct Visit
{
    lowlink: usize,
    on_stack: bool,
}

struct Frame<T>
    where T: RefCounted
{
    node: usize,
    children: Vec<Obj<T>>,
    next: usize,
}

/// State of the iterative Tarjan walk.
struct Tarjan<T>
    where T: RefCounted
{
    max_depth: usize,
    index: IntTable<usize>,
    nodes: Vec<Obj<T>>,
    visits: Vec<Visit>,
    stack: Vec<usize>,
    calls: Vec<Frame<T>>,
    sccs: Vec<Vec<Obj<T>>>,
}

impl<T> Tarjan<T>
    where T: RefCounted
{
    fn enter(&mut self, obj: &Obj<T>) -> Result<()>
    {
        if self.nodes.len() >= MAX_OBJECTS {
            return Err(Error::TooManyObjects);
        }
        if self.calls.len() >= self.max_depth {
            return Err(Error::DepthExceeded);
        }

        let i = self.nodes.len();
        self.index.insert(obj.addr(), i)?;
        self.nodes.push(obj.clone());
        self.visits.push(Visit{lowlink: i, on_stack: true});
        self.stack.push(i);

        let mut children = Vec::new();
        obj.with(|data| data.visit(&mut |child| {
            if !child.is_frozen() {
                children.push(child.clone());
            }
        }))?;
        self.calls.push(Frame{node: i, children, next: 0});
        Ok(())
    }

    fn run(&mut self, root: &Obj<T>) -> Result<()>
    {
        self.enter(root)?;

        while let Some(frame) = self.calls.last_mut() {
            let v = frame.node;
            if let Some(child) = frame.children.get(frame.next).cloned() {
                frame.next += 1;
                match self.index.lookup(child.addr()) {
                    None => self.enter(&child)?,
                    Some(&w) => if self.visits[w].on_stack {
                        let low = &mut self.visits[v].lowlink;
                        *low = (*low).min(w);
                    },
                }
                continue;
            }

            self.calls.pop();
            let low = self.visits[v].lowlink;
            if let Some(parent) = self.calls.last() {
                let p = &mut self.visits[parent.node].lowlink;
                *p = (*p).min(low);
            }
            if low == v {
                let mut scc = Vec::new();
                loop {
                    let w = self.stack.pop()
                        .expect("Tarjan stack holds the component root");
                    self.visits[w].on_stack = false;
                    scc.push(self.nodes[w].clone());
                    if w == v {
                        break;
                    }
                }
                scc.reverse();
                self.sccs.push(scc);
            }
        }
        Ok(())
    }
}

impl<T> Plan<T>
    where T: RefCounted
{
    /// Compute the components reachable from `roots`.
    ///
    /// Fails with [`Error::DepthExceeded`] if any path is longer than
    /// `max_depth`, and with [`Error::TooManyObjects`] if too many
    /// objects are reachable.
    pub fn new(roots: &[Obj<T>], max_depth: usize) -> Result<Self>
    {
        let mut tarjan = Tarjan{
            max_depth,
            index: IntTable::new(),
            nodes: Vec::new(),
            visits: Vec::new(),
            stack: Vec::new(),
            calls: Vec::new(),
            sccs: Vec::new(),
        };
        for root in roots {
            if !root.is_frozen() && !tarjan.index.contains(root.addr()) {
                tarjan.run(root)?;
            }
        }
        Ok(Self{roots: roots.to_vec(), sccs: tarjan.sccs})
    }

    /// Every object the plan will freeze.
    pub fn objects(&self) -> impl Iterator<Item=&Obj<T>>
    {
        self.sccs.iter().flatten()
    }

    /// Number of components.
    pub fn scc_count(&self) -> usize
    {
        self.sccs.len()
    }

    /// Freeze the planned objects.
    pub fn commit(self) -> Vec<Handle<T::Frozen>>
    {
        let objects: usize = self.sccs.iter().map(Vec::len).sum();
        tracing::debug!(objects, sccs = self.sccs.len(), "freezing objects");

        let mut old_groups = Vec::new();
        for scc in &self.sccs {
            freeze_scc(scc, &mut old_groups);
        }

        // Whatever is left in the old groups was not reachable from the roots.
        for old in old_groups {
            if old.count.get() == 0 {
                collect(&old);
            }
        }

        self.roots.iter()
            .map(|root| root.frozen().expect("Every root was frozen"))
            .collect()
    }
}

fn freeze_scc<T>(scc: &[Obj<T>], old_groups: &mut Vec<Rc<Group<T>>>)
    where T: RefCounted
{
    let mut local: IntTable<usize> = IntTable::new();
    for (i, obj) in scc.iter().enumerate() {
        let _ = local.insert(obj.addr(), i);
    }

    let mut link = |sub: &SubRef<T>| match sub {
        SubRef::Frozen(handle) => Link::Remote(handle.clone()),
        SubRef::Mutable(obj) => match local.lookup(obj.addr()) {
            Some(&i) => Link::Local(i),
            None => Link::Remote(
                obj.frozen().expect("Components are frozen in dependency order"),
            ),
        },
    };

    let members = scc.iter()
        .map(|obj| {
            let data = obj.0.data.borrow_mut().take()
                .expect("Planned objects stay mutable until commit");
            data.freeze(&mut link)
        })
        .collect();
    let group = Arc::new(FrozenGroup{members});

    // Owner handles now share a group per component.
    // Frozen members have no data to collect, so the group lists none.
    let count = scc.iter().map(|obj| obj.0.count.get()).sum();
    let regrouped = Rc::new(Group{count: Cell::new(count), members: RefCell::new(Vec::new())});

    for (index, obj) in scc.iter().enumerate() {
        let handle = Handle{group: group.clone(), index};
        let _ = obj.0.frozen.set(handle);

        let old = std::mem::replace(&mut *obj.0.group.borrow_mut(), regrouped.clone());
        old.count.set(old.count.get() - obj.0.count.get());
        old.members.borrow_mut().retain(|m| !Rc::ptr_eq(m, &obj.0));
        if !old_groups.iter().any(|g| Rc::ptr_eq(g, &old)) {
            old_groups.push(old);
        }
    }
}
