/// Declares a C-style enum that travels as an integer.
///
/// Gets serde (kebab-case names), `Display`/`FromStr` through
/// `serde_plain`, and a checked `TryFrom<i32>`.
macro_rules! wire_enum {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $( $(#[$inner:meta])* $variant:ident = $value:expr, )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $( $(#[$inner])* $variant = $value, )*
        }

        impl $name {
            /// The integer sent over the wire.
            pub fn code(self) -> i32 {
                self as i32
            }
        }

        impl std::convert::TryFrom<i32> for $name {
            type Error = anyhow::Error;

            fn try_from(value: i32) -> Result<Self, anyhow::Error> {
                $( if value == $value { return Ok($name::$variant); } )*
                anyhow::bail!("invalid {} value {}", stringify!($name), value)
            }
        }

        serde_plain::derive_display_from_serialize!($name);
        serde_plain::derive_fromstr_from_deserialize!($name);
    };
}
