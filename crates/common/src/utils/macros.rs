//! Macros for reducing boilerplate code
//!
//! This module contains declarative macros that eliminate repetitive
//! implementations across the codebase, particularly for label-style enums
//! that appear in logs, config files, and metrics keys.

/// Implements `as_str`, Display and FromStr for label enums
///
/// This macro generates:
/// - `as_str`: the variant's snake_case label as a `&'static str`
/// - Display trait: writes the label returned by `as_str`
/// - FromStr trait: parses case-insensitive strings to enum variants
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations (must be lowercase)
///
/// # Example
///
/// ```rust
/// use shipyard_common::impl_label_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum PullStage {
///     Resolve,
///     Download,
///     Extract,
/// }
///
/// impl_label_conversions!(PullStage {
///     Resolve => "resolve",
///     Download => "download",
///     Extract => "extract",
/// });
///
/// assert_eq!(PullStage::Download.as_str(), "download");
/// assert_eq!(PullStage::Download.to_string(), "download");
/// assert_eq!("EXTRACT".parse::<PullStage>(), Ok(PullStage::Extract));
/// ```
#[macro_export]
macro_rules! impl_label_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable snake_case label
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    //! Unit tests for utils::macros.
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PushStage {
        Authenticate,
        Upload,
        Commit,
    }

    impl_label_conversions!(PushStage {
        Authenticate => "authenticate",
        Upload => "upload",
        Commit => "commit",
    });

    /// Validates `PushStage::Upload` behavior for the display conversion
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms each variant renders its configured label.
    #[test]
    fn test_display_conversion() {
        assert_eq!(PushStage::Upload.as_str(), "upload");
        assert_eq!(PushStage::Authenticate.to_string(), "authenticate");
        assert_eq!(PushStage::Upload.to_string(), "upload");
        assert_eq!(PushStage::Commit.to_string(), "commit");
    }

    /// Validates `PushStage::from_str` behavior for the mixed case scenario.
    ///
    /// Assertions:
    /// - Confirms parsing ignores ASCII case.
    #[test]
    fn test_fromstr_mixed_case() {
        assert_eq!(PushStage::from_str("UPLOAD").unwrap(), PushStage::Upload);
        assert_eq!(PushStage::from_str("CoMmIt").unwrap(), PushStage::Commit);
    }

    /// Validates `PushStage::from_str` behavior for the invalid scenario.
    ///
    /// Assertions:
    /// - Ensures the error message names the enum and the rejected input.
    #[test]
    fn test_fromstr_invalid() {
        let result = PushStage::from_str("rollback");
        assert!(result.unwrap_err().contains("Invalid PushStage: rollback"));
    }
}
