//! Reference counting with cycle collection for mutable object graphs.
//!
//! While mutable, objects that reference each other share a *group*.
//! The group keeps one count: the sum of the owner refs of its members.
//! When that count drops to zero the whole group is collected,
//! so cycles within a group do not leak.
//!
//! Freezing splits the graph into strongly connected components.
//! Each component becomes an immutable [`FrozenGroup`] behind an [`Arc`].
//! Links within a component are indices and links between components
//! are [`Handle`]s; because components form a DAG, no [`Arc`] cycles arise.

pub use self::freeze::*;

use {
    std::{
        cell::{Cell, OnceCell, Ref as CellRef, RefCell, RefMut},
        fmt,
        mem::ManuallyDrop,
        ops::Deref,
        rc::Rc,
        sync::{Arc, atomic::{AtomicU64, Ordering::Relaxed}},
    },
    crate::{Error, Result},
};

#[cfg(debug_assertions)]
use rime_table::IntTable;

mod freeze;

/// Data of a refcounted object.
pub trait RefCounted: Sized + 'static
{
    /// Immutable form of the data.
    type Frozen: Send + Sync + 'static;

    /// Call `f` on every mutable object this one holds a sub-ref to.
    fn visit(&self, f: &mut dyn FnMut(&Obj<Self>));

    /// Convert into the immutable form.
    ///
    /// `link` maps each sub-ref held by the data to a frozen link.
    fn freeze(self, link: &mut dyn FnMut(&SubRef<Self>) -> Link<Self::Frozen>)
        -> Self::Frozen;
}

/* -------------------------------------------------------------------------- */
/*                                  Owners                                    */
/* -------------------------------------------------------------------------- */

/// Identity of the holder of an owner ref.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Owner(u64);

impl Owner
{
    /// Owner whose identity is not recorded.
    pub const UNTRACKED: Owner = Owner(0);

    /// A fresh owner identity.
    pub fn new() -> Self
    {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Owner(NEXT.fetch_add(1, Relaxed))
    }
}

/* -------------------------------------------------------------------------- */
/*                              Mutable objects                               */
/* -------------------------------------------------------------------------- */

pub (crate) struct Node<T>
    where T: RefCounted
{
    /// [`None`] once frozen or collected.
    data: RefCell<Option<T>>,
    group: RefCell<Rc<Group<T>>>,

    /// Owner refs held on this object.
    count: Cell<usize>,

    frozen: OnceCell<Handle<T::Frozen>>,

    /// Owner refs by owner, for leak attribution.
    #[cfg(debug_assertions)]
    owners: RefCell<IntTable<usize>>,
}

struct Group<T>
    where T: RefCounted
{
    /// Sum of the counts of the members.
    count: Cell<usize>,
    members: RefCell<Vec<Rc<Node<T>>>>,
}

/// Pointer to a refcounted object that holds no owner ref.
///
/// The object stays allocated while the pointer exists,
/// but its data may be collected when the group count drops to zero.
pub struct Obj<T>(pub (crate) Rc<Node<T>>)
    where T: RefCounted;

impl<T> Obj<T>
    where T: RefCounted
{
    /// Borrow the data.
    ///
    /// Fails with [`Error::Frozen`] if the object is frozen.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R>
    {
        let data = self.0.data.borrow();
        let data = data.as_ref().ok_or(Error::Frozen)?;
        Ok(f(data))
    }

    /// Borrow the data mutably.
    ///
    /// Fails with [`Error::Frozen`] if the object is frozen.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R>
    {
        let mut data = self.0.data.borrow_mut();
        let data = data.as_mut().ok_or(Error::Frozen)?;
        Ok(f(data))
    }

    pub (crate) fn data(&self) -> Option<CellRef<T>>
    {
        CellRef::filter_map(self.0.data.borrow(), Option::as_ref).ok()
    }

    pub (crate) fn data_mut(&self) -> Option<RefMut<T>>
    {
        RefMut::filter_map(self.0.data.borrow_mut(), Option::as_mut).ok()
    }

    /// Whether the object was frozen.
    pub fn is_frozen(&self) -> bool
    {
        self.0.frozen.get().is_some()
    }

    /// The frozen form of the object, once frozen.
    pub fn frozen(&self) -> Option<Handle<T::Frozen>>
    {
        self.0.frozen.get().cloned()
    }

    /// Whether both point to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the object, as a table key.
    pub fn addr(&self) -> u64
    {
        Rc::as_ptr(&self.0) as usize as u64
    }

    /// Whether both objects are in the same group.
    pub fn same_group(&self, other: &Self) -> bool
    {
        Rc::ptr_eq(&self.0.group.borrow(), &other.0.group.borrow())
    }

    /// Owner refs held on the object's group.
    pub fn group_count(&self) -> usize
    {
        self.0.group.borrow().count.get()
    }

    /// Take an owner ref on the object.
    pub fn take_ref(&self, owner: Owner) -> Ref<T>
    {
        self.0.count.set(self.0.count.get() + 1);
        let group = self.0.group.borrow();
        group.count.set(group.count.get() + 1);
        #[cfg(debug_assertions)]
        track_owner(&self.0, owner, 1);
        Ref{obj: self.clone(), owner}
    }
}

impl<T> Clone for Obj<T>
    where T: RefCounted
{
    fn clone(&self) -> Self
    {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for Obj<T>
    where T: RefCounted
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Obj({:#x})", self.addr())
    }
}

/* -------------------------------------------------------------------------- */
/*                                Owner refs                                  */
/* -------------------------------------------------------------------------- */

/// Owner ref on a refcounted object.
///
/// Cloning takes another ref for the same owner.
/// Dropping releases the ref, and collects the group
/// if it was the last one.
pub struct Ref<T>
    where T: RefCounted
{
    obj: Obj<T>,
    owner: Owner,
}

impl<T> Ref<T>
    where T: RefCounted
{
    /// Create an object holding one ref for `owner`.
    pub fn new(data: T, owner: Owner) -> Self
    {
        let group = Rc::new(Group{count: Cell::new(0), members: RefCell::new(Vec::new())});
        let node = Rc::new(Node{
            data: RefCell::new(Some(data)),
            group: RefCell::new(group.clone()),
            count: Cell::new(0),
            frozen: OnceCell::new(),
            #[cfg(debug_assertions)]
            owners: RefCell::new(IntTable::new()),
        });
        group.members.borrow_mut().push(node.clone());
        Obj(node).take_ref(owner)
    }

    /// The object, without the ref.
    pub fn obj(&self) -> &Obj<T>
    {
        &self.obj
    }

    /// The holder of this ref.
    pub fn owner(&self) -> Owner
    {
        self.owner
    }

    /// Move the ref to another owner.
    ///
    /// Donating to the current owner changes nothing.
    pub fn donate(self, to: Owner) -> Self
    {
        if self.owner == to {
            return self;
        }
        let this = ManuallyDrop::new(self);
        #[cfg(debug_assertions)]
        {
            track_owner(&this.obj.0, this.owner, -1);
            track_owner(&this.obj.0, to, 1);
        }
        // SAFETY: this is never dropped, so obj is moved out exactly once.
        let obj = unsafe { std::ptr::read(&this.obj) };
        Ref{obj, owner: to}
    }

    /// Assert that the owner holds a ref.
    ///
    /// Only checked in debug builds, and never for untracked owners.
    pub fn check_ref(&self)
    {
        #[cfg(debug_assertions)]
        if self.owner != Owner::UNTRACKED {
            let owners = self.obj.0.owners.borrow();
            assert!(
                owners.lookup(self.owner.0).map_or(false, |&n| n > 0),
                "{:?} holds no ref on {:?}", self.owner, self.obj,
            );
        }
    }
}

impl<T> Deref for Ref<T>
    where T: RefCounted
{
    type Target = Obj<T>;

    fn deref(&self) -> &Obj<T>
    {
        &self.obj
    }
}

impl<T> Clone for Ref<T>
    where T: RefCounted
{
    fn clone(&self) -> Self
    {
        self.obj.take_ref(self.owner)
    }
}

impl<T> Drop for Ref<T>
    where T: RefCounted
{
    fn drop(&mut self)
    {
        let node = &self.obj.0;
        #[cfg(debug_assertions)]
        track_owner(node, self.owner, -1);
        node.count.set(node.count.get() - 1);
        let group = node.group.borrow().clone();
        group.count.set(group.count.get() - 1);
        if group.count.get() == 0 {
            collect(&group);
        }
    }
}

impl<T> fmt::Debug for Ref<T>
    where T: RefCounted
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Ref")
            .field("obj", &self.obj)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(debug_assertions)]
fn track_owner<T>(node: &Node<T>, owner: Owner, delta: isize)
    where T: RefCounted
{
    if owner == Owner::UNTRACKED {
        return;
    }
    let mut owners = node.owners.borrow_mut();
    match owners.lookup_mut(owner.0) {
        Some(n) => *n = n.wrapping_add_signed(delta),
        None => { let _ = owners.insert(owner.0, delta.max(0) as usize); },
    }
    if owners.lookup(owner.0) == Some(&0) {
        owners.remove(owner.0);
    }
}

/// Free the data of every member of a group that lost its last ref.
fn collect<T>(group: &Group<T>)
    where T: RefCounted
{
    let members = std::mem::take(&mut *group.members.borrow_mut());
    for member in &members {
        let data = member.data.borrow_mut().take();
        drop(data);
    }
}

/// Move every member of the smaller group into the larger one.
fn merge<T>(a: &Obj<T>, b: &Obj<T>)
    where T: RefCounted
{
    let ga = a.0.group.borrow().clone();
    let gb = b.0.group.borrow().clone();
    if Rc::ptr_eq(&ga, &gb) {
        return;
    }
    let a_larger = ga.members.borrow().len() >= gb.members.borrow().len();
    let (into, from) = match a_larger {
        true => (ga, gb),
        false => (gb, ga),
    };
    let moved = std::mem::take(&mut *from.members.borrow_mut());
    for node in &moved {
        *node.group.borrow_mut() = into.clone();
    }
    into.count.set(into.count.get() + from.count.get());
    from.count.set(0);
    into.members.borrow_mut().extend(moved);
}

/* -------------------------------------------------------------------------- */
/*                                 Sub-refs                                   */
/* -------------------------------------------------------------------------- */

/// Reference held by one refcounted object on another.
pub enum SubRef<T>
    where T: RefCounted
{
    /// Target is mutable; source and target share a group.
    Mutable(Obj<T>),

    /// Target was frozen.
    Frozen(Handle<T::Frozen>),
}

impl<T> SubRef<T>
    where T: RefCounted
{
    /// Reference `to` from `from`, merging their groups if `to` is mutable.
    pub fn new(from: &Obj<T>, to: &Obj<T>) -> Self
    {
        match to.frozen() {
            Some(handle) => SubRef::Frozen(handle),
            None => {
                merge(from, to);
                SubRef::Mutable(to.clone())
            },
        }
    }

    /// Reference a frozen object.
    pub fn frozen(handle: Handle<T::Frozen>) -> Self
    {
        SubRef::Frozen(handle)
    }

    /// The target if it is still mutable.
    pub fn as_mutable(&self) -> Option<&Obj<T>>
    {
        match self {
            SubRef::Mutable(obj) if !obj.is_frozen() => Some(obj),
            _ => None,
        }
    }

    /// The frozen form of the target, if it is frozen.
    pub fn as_frozen(&self) -> Option<Handle<T::Frozen>>
    {
        match self {
            SubRef::Mutable(obj) => obj.frozen(),
            SubRef::Frozen(handle) => Some(handle.clone()),
        }
    }

    /// Whether both reference the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        match (self, other) {
            (SubRef::Mutable(a), SubRef::Mutable(b)) => a.ptr_eq(b),
            _ => match (self.as_frozen(), other.as_frozen()) {
                (Some(a), Some(b)) => a.ptr_eq(&b),
                _ => false,
            },
        }
    }
}

impl<T> Clone for SubRef<T>
    where T: RefCounted
{
    fn clone(&self) -> Self
    {
        match self {
            SubRef::Mutable(obj) => SubRef::Mutable(obj.clone()),
            SubRef::Frozen(handle) => SubRef::Frozen(handle.clone()),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                              Frozen objects                                */
/* -------------------------------------------------------------------------- */

/// Strongly connected component of frozen objects.
pub struct FrozenGroup<F>
{
    members: Vec<F>,
}

/// Shared handle to a frozen object.
pub struct Handle<F>
{
    group: Arc<FrozenGroup<F>>,
    index: usize,
}

/// Link from a frozen object to another.
pub enum Link<F>
{
    /// Target is in the same component, at this index.
    Local(usize),

    /// Target is in another component.
    Remote(Handle<F>),
}

impl<F> Handle<F>
{
    /// The frozen object.
    pub fn get(&self) -> &F
    {
        &self.group.members[self.index]
    }

    /// Resolve a link held by this object.
    pub fn follow(&self, link: &Link<F>) -> Handle<F>
    {
        match link {
            Link::Local(index) => Handle{group: self.group.clone(), index: *index},
            Link::Remote(handle) => handle.clone(),
        }
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        Arc::ptr_eq(&self.group, &other.group) && self.index == other.index
    }

    /// Whether both objects are in the same component.
    pub fn same_group(&self, other: &Self) -> bool
    {
        Arc::ptr_eq(&self.group, &other.group)
    }

    /// Address of the object, as a table key.
    pub fn addr(&self) -> u64
    {
        self.get() as *const F as usize as u64
    }
}

impl<F> Clone for Handle<F>
{
    fn clone(&self) -> Self
    {
        Self{group: self.group.clone(), index: self.index}
    }
}

impl<F> Clone for Link<F>
{
    fn clone(&self) -> Self
    {
        match self {
            Link::Local(index) => Link::Local(*index),
            Link::Remote(handle) => Link::Remote(handle.clone()),
        }
    }
}

impl<F> fmt::Debug for Handle<F>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Handle({:#x})", self.addr())
    }
}
