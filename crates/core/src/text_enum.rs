//! Enums persisted and transported as short lowercase strings.

/// Declare a fieldless enum with a canonical string form.
///
/// Generates `as_str`, `ALL`, `Display`, `FromStr` (→ `DomainError::Validation`)
/// and serde support using the same strings.
///
/// ```ignore
/// text_enum! {
///     pub enum Usage {
///         Residential => "residential",
///         Commercial => "commercial",
///     }
/// }
/// ```
#[macro_export]
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $name {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::DomainError::validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::DomainError;

    crate::text_enum! {
        #[derive(Default)]
        pub enum Color {
            #[default]
            Red => "red",
            DarkBlue => "dark_blue",
        }
    }

    #[test]
    fn parses_and_prints_canonical_strings() {
        assert_eq!("dark_blue".parse::<Color>(), Ok(Color::DarkBlue));
        assert_eq!(Color::Red.to_string(), "red");
        assert_eq!(Color::default(), Color::Red);
        assert_eq!(Color::ALL.len(), 2);
    }

    #[test]
    fn unknown_value_is_a_validation_error() {
        assert!(matches!("green".parse::<Color>(), Err(DomainError::Validation(_))));
    }
}
