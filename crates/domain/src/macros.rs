//! Macro for implementing Display and FromStr for simple domain enums
//!
//! # Example
//!
//! ```rust
//! use specforge_domain::impl_domain_enum_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Stage {
//!     Queued,
//!     Running,
//! }
//!
//! impl_domain_enum_conversions!(Stage {
//!     Queued => "queued",
//!     Running => "running",
//! });
//!
//! assert_eq!(Stage::Running.to_string(), "running");
//! assert_eq!("QUEUED".parse::<Stage>().unwrap(), Stage::Queued);
//! ```

/// Implements Display and case-insensitive FromStr for a fieldless enum
#[macro_export]
macro_rules! impl_domain_enum_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::SpecForgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err($crate::SpecForgeError::InvalidInput(format!(
                        "Invalid {}: {}",
                        stringify!($enum_name),
                        s
                    ))),
                }
            }
        }
    };
}
