//! A set of macros for easily working with internals.

/// Declares a C-like enum carried on the wire as a bare integer.
///
/// Unknown values fail deserialisation, so callers can treat them as malformed payloads.
macro_rules! enum_number {
    ($(#[$outer:meta])* $name:ident { $($(#[$attr:meta])* $variant:ident = $value:expr,)* }) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
        #[non_exhaustive]
        pub enum $name {
            $(
                $(#[$attr])*
                $variant = $value,
            )*
        }

        impl $name {
            /// Maps a raw wire value onto a known variant.
            #[must_use]
            pub fn from_num(num: u64) -> Option<Self> {
                match num {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.serialize_u64(*self as u64)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                struct Visitor;

                impl<'de> ::serde::de::Visitor<'de> for Visitor {
                    type Value = $name;

                    fn expecting(
                        &self,
                        formatter: &mut ::std::fmt::Formatter<'_>,
                    ) -> ::std::fmt::Result {
                        formatter.write_str("positive integer")
                    }

                    fn visit_u64<E>(self, value: u64) -> ::std::result::Result<$name, E>
                    where
                        E: ::serde::de::Error,
                    {
                        $name::from_num(value).ok_or_else(|| {
                            E::custom(format!("unknown {} value: {}", stringify!($name), value))
                        })
                    }
                }

                deserializer.deserialize_u64(Visitor)
            }
        }
    };
}
