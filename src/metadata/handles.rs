use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            owner: u32,
            index: u32,
        }

        impl $name {
            pub(crate) fn new(owner: u32, index: usize) -> Self {
                Self {
                    owner,
                    index: index as u32,
                }
            }

            /// Identifier of the runtime that issued this handle.
            pub fn owner(self) -> u32 {
                self.owner
            }

            pub fn index(self) -> usize {
                self.index as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}@{}", stringify!($name), self.index, self.owner)
            }
        }
    };
}

define_handle!(
    /// A loaded assembly. Assemblies are never unloaded, so a handle stays valid for the lifetime
    /// of the runtime that issued it. Other runtimes reject it.
    AssemblyHandle
);
define_handle!(ModuleHandle);
define_handle!(
    /// A class record in the runtime's append-only class table.
    ClassHandle
);
