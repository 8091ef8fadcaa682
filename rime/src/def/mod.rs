//! Schema definitions.
//!
//! Definitions are built through mutable handles
//! ([`MessageDef`], [`FieldDef`], [`EnumDef`], [`OneofDef`])
//! and then frozen together into immutable views
//! ([`MessageView`], [`FieldView`], [`EnumView`], [`OneofView`]),
//! which are cheap to clone and safe to share between threads.

pub use self::{enumdef::*, field::*, freeze::*, message::*, oneof::*, view::*};

use {
    crate::{
        Error, Result,
        refcounted::{Link, Obj, Owner, Ref, RefCounted, SubRef},
    },
    bitflags::bitflags,
    regex::Regex,
    std::{fmt, sync::OnceLock},
};

mod dup;
mod enumdef;
mod field;
mod freeze;
mod message;
mod oneof;
mod view;

bitflags!
{
    /// Filter over kinds of definitions.
    pub struct DefType: u8
    {
        /// Messages.
        const MSG   = 0b0001;
        /// Fields.
        const FIELD = 0b0010;
        /// Enums.
        const ENUM  = 0b0100;
        /// Oneofs.
        const ONEOF = 0b1000;
        /// Every kind.
        const ANY   = 0b1111;
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Data                                     */
/* -------------------------------------------------------------------------- */

pub (crate) struct DefData
{
    /// Full name for messages and enums, short name for fields and oneofs.
    pub name: Option<String>,

    /// Set while a symbol table adds the definition on behalf of the user.
    pub came_from_user: bool,

    pub kind: DefKind,
}

pub (crate) enum DefKind
{
    Msg(MsgData),
    Field(FieldData),
    Enum(EnumData),
    Oneof(OneofData),
}

pub (crate) struct FrozenDef
{
    pub name: Option<String>,
    pub kind: FrozenKind,
}

pub (crate) enum FrozenKind
{
    Msg(FrozenMsg),
    Field(FrozenField),
    Enum(FrozenEnum),
    Oneof(FrozenOneof),
}

/// Reference to another definition, either direct or by name.
pub (crate) enum SymRef
{
    Direct(SubRef<DefData>),
    Symbolic(String),
}

impl DefData
{
    fn new(kind: DefKind) -> Self
    {
        Self{name: None, came_from_user: false, kind}
    }

    pub fn def_type(&self) -> DefType
    {
        match self.kind {
            DefKind::Msg(_)   => DefType::MSG,
            DefKind::Field(_) => DefType::FIELD,
            DefKind::Enum(_)  => DefType::ENUM,
            DefKind::Oneof(_) => DefType::ONEOF,
        }
    }
}

impl FrozenDef
{
    pub fn def_type(&self) -> DefType
    {
        match self.kind {
            FrozenKind::Msg(_)   => DefType::MSG,
            FrozenKind::Field(_) => DefType::FIELD,
            FrozenKind::Enum(_)  => DefType::ENUM,
            FrozenKind::Oneof(_) => DefType::ONEOF,
        }
    }
}

impl RefCounted for DefData
{
    type Frozen = FrozenDef;

    fn visit(&self, f: &mut dyn FnMut(&Obj<Self>))
    {
        let mut sub = |s: &SubRef<DefData>| if let Some(obj) = s.as_mutable() { f(obj) };
        let mut sym = |s: &Option<SymRef>| if let Some(SymRef::Direct(s)) = s { sub(s) };
        match &self.kind {
            DefKind::Msg(m) => {
                m.fields.iter().for_each(&mut sub);
                m.oneofs.iter().for_each(&mut sub);
            },
            DefKind::Field(d) => {
                sym(&d.containing);
                sym(&d.subdef);
                d.oneof.iter().for_each(&mut sub);
            },
            DefKind::Enum(_) => (),
            DefKind::Oneof(o) => {
                o.fields.iter().for_each(&mut sub);
                o.parent.iter().for_each(&mut sub);
            },
        }
    }

    fn freeze(self, link: &mut dyn FnMut(&SubRef<Self>) -> Link<FrozenDef>) -> FrozenDef
    {
        let kind = match self.kind {
            DefKind::Msg(m)   => FrozenKind::Msg(m.freeze(link)),
            DefKind::Field(d) => FrozenKind::Field(d.freeze(link)),
            DefKind::Enum(e)  => FrozenKind::Enum(e.freeze()),
            DefKind::Oneof(o) => FrozenKind::Oneof(o.freeze(link)),
        };
        FrozenDef{name: self.name, kind}
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Handles                                   */
/* -------------------------------------------------------------------------- */

/// Mutable handle to a definition of any kind.
#[derive(Clone)]
pub struct Def(pub (crate) Ref<DefData>);

impl Def
{
    pub (crate) fn from_obj(obj: &Obj<DefData>) -> Self
    {
        Def(obj.take_ref(Owner::UNTRACKED))
    }

    pub (crate) fn obj(&self) -> &Obj<DefData>
    {
        self.0.obj()
    }

    /// Kind of the definition.
    ///
    /// Fails with [`Error::Frozen`] once frozen;
    /// use [`view`] then.
    ///
    /// [`view`]: `Self::view`
    pub fn def_type(&self) -> Result<DefType>
    {
        self.0.with(DefData::def_type)
    }

    /// Name of the definition.
    pub fn full_name(&self) -> Option<String>
    {
        match self.view() {
            Some(view) => view.full_name().map(str::to_owned),
            None => self.0.with(|d| d.name.clone()).ok().flatten(),
        }
    }

    /// Whether the definition was frozen.
    pub fn is_frozen(&self) -> bool
    {
        self.0.is_frozen()
    }

    /// The frozen definition, once frozen.
    pub fn view(&self) -> Option<DefView>
    {
        self.0.frozen().map(DefView)
    }

    /// The definition as a message, if it is one.
    pub fn as_message(&self) -> Option<MessageDef>
    {
        self.is_kind(DefType::MSG).then(|| MessageDef(self.0.clone()))
    }

    /// The definition as a field, if it is one.
    pub fn as_field(&self) -> Option<FieldDef>
    {
        self.is_kind(DefType::FIELD).then(|| FieldDef(self.0.clone()))
    }

    /// The definition as an enum, if it is one.
    pub fn as_enum(&self) -> Option<EnumDef>
    {
        self.is_kind(DefType::ENUM).then(|| EnumDef(self.0.clone()))
    }

    /// The definition as a oneof, if it is one.
    pub fn as_oneof(&self) -> Option<OneofDef>
    {
        self.is_kind(DefType::ONEOF).then(|| OneofDef(self.0.clone()))
    }

    fn is_kind(&self, kind: DefType) -> bool
    {
        match self.view() {
            Some(view) => view.def_type() == kind,
            None => self.0.with(|d| d.def_type() == kind).unwrap_or(false),
        }
    }

    /// Copy the definition.
    ///
    /// See [`MessageDef::dup`] for how references are copied.
    pub fn dup(&self) -> Result<Def>
    {
        dup::dup(self)
    }
}

impl fmt::Debug for Def
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Def({:?})", self.full_name())
    }
}

/// Shared behavior of the typed handles.
macro_rules! def_handle
{
    ($name:ident, $view:ident, $variant:ident, $data:ident) => {
        impl $name
        {
            /// The handle as an untyped definition.
            pub fn as_def(&self) -> $crate::def::Def
            {
                $crate::def::Def(self.0.clone())
            }

            /// Whether the definition was frozen.
            pub fn is_frozen(&self) -> bool
            {
                self.0.is_frozen()
            }

            /// The frozen definition, once frozen.
            pub fn view(&self) -> Option<$crate::def::$view>
            {
                self.0.frozen().map(|h| $crate::def::$view($crate::def::DefView(h)))
            }

            #[allow(dead_code)]
            pub (crate) fn obj(&self) -> &$crate::refcounted::Obj<$crate::def::DefData>
            {
                self.0.obj()
            }

            #[allow(dead_code)]
            pub (crate) fn with<R>(&self, f: impl FnOnce(&$crate::def::DefData, &$data) -> R)
                -> $crate::Result<R>
            {
                self.0.with(|d| match &d.kind {
                    $crate::def::DefKind::$variant(k) => f(d, k),
                    _ => unreachable!("Handle kind matches its data"),
                })
            }

            #[allow(dead_code)]
            pub (crate) fn with_mut<R>(
                &self,
                f: impl FnOnce(&mut Option<String>, &mut $data) -> R,
            ) -> $crate::Result<R>
            {
                self.0.with_mut(|d| match &mut d.kind {
                    $crate::def::DefKind::$variant(k) => f(&mut d.name, k),
                    _ => unreachable!("Handle kind matches its data"),
                })
            }
        }

        impl From<$name> for $crate::def::Def
        {
            fn from(handle: $name) -> Self
            {
                $crate::def::Def(handle.0)
            }
        }

        impl std::fmt::Debug for $name
        {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
            {
                write!(f, "{}({:?})", stringify!($name), self.as_def().full_name())
            }
        }
    };
}

use def_handle;

/* -------------------------------------------------------------------------- */
/*                                   Names                                    */
/* -------------------------------------------------------------------------- */

fn ident_regex() -> &'static Regex
{
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new("^[A-Za-z_][A-Za-z0-9_]*$")
            .expect("Identifier pattern is valid")
    })
}

/// Check that `name` is an identifier,
/// or with `full`, dot-separated identifiers.
pub (crate) fn check_name(name: &str, full: bool) -> Result<()>
{
    let ok = match full {
        true => name.split('.').all(|c| ident_regex().is_match(c)),
        false => ident_regex().is_match(name),
    };
    match ok {
        true => Ok(()),
        false => Err(Error::InvalidName(name.to_owned())),
    }
}

/// Mutable data of a handle, failing on frozen or collected objects.
pub (crate) fn data_mut(obj: &Obj<DefData>) -> Result<std::cell::RefMut<DefData>>
{
    obj.data_mut().ok_or(Error::Frozen)
}
