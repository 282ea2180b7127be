//! Engine status codes.
//!
//! The signing engine reports failures as negative integers over the
//! foreign-function boundary. The exact values are part of the engine ABI
//! and must not be renumbered; this module maps each code to a category
//! and a human-readable description.

use std::fmt;

/// Category of an engine failure code.
///
/// Every code in the engine's catalog maps to exactly one category;
/// any unlisted non-zero code maps to [`StatusCategory::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// Input path rejected by the engine (-1, -201).
    InvalidInputPath,
    /// Non-adhoc signing requested without key and provisioning (-2, -202).
    MissingCredentials,
    /// Engine could not prepare its output file (-3).
    OutputPreparation,
    /// Input is not a valid Mach-O binary (-4).
    InvalidBinary,
    /// Signing assets could not be initialized (-5, -203).
    AssetInitialization,
    /// The signing operation itself failed (-6, -204).
    SigningFailed,
    /// Output pointer slots were null or unreadable (-101).
    InvalidOutputSlots,
    /// Input buffer had zero length (-102).
    EmptyInput,
    /// Engine failed to stage an input/cert/key/profile/entitlements file (-103..-107).
    StagingFile,
    /// Engine could not read the signed output back (-108).
    OutputRead,
    /// Engine could not allocate the output buffer (-109).
    OutputAllocation,
    /// Any other non-zero code.
    Unknown,
}

/// A non-zero status returned by an engine entry point.
///
/// Wraps the raw code so the original value survives into error reports,
/// while [`category`](EngineStatus::category) and
/// [`description`](EngineStatus::description) give the decoded view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus(i32);

impl EngineStatus {
    /// Wraps a raw status code as reported by the engine.
    pub fn from_code(code: i32) -> Self {
        EngineStatus(code)
    }

    /// The raw code, unchanged.
    pub fn code(&self) -> i32 {
        self.0
    }

    /// Decodes the code into its failure category.
    pub fn category(&self) -> StatusCategory {
        match self.0 {
            -1 | -201 => StatusCategory::InvalidInputPath,
            -2 | -202 => StatusCategory::MissingCredentials,
            -3 => StatusCategory::OutputPreparation,
            -4 => StatusCategory::InvalidBinary,
            -5 | -203 => StatusCategory::AssetInitialization,
            -6 | -204 => StatusCategory::SigningFailed,
            -101 => StatusCategory::InvalidOutputSlots,
            -102 => StatusCategory::EmptyInput,
            -107..=-103 => StatusCategory::StagingFile,
            -108 => StatusCategory::OutputRead,
            -109 => StatusCategory::OutputAllocation,
            _ => StatusCategory::Unknown,
        }
    }

    /// Description string matching the engine's own catalog.
    pub fn description(&self) -> &'static str {
        match self.0 {
            -1 => "invalid input path",
            -2 => "non ad-hoc mode requires key and provisioning",
            -3 => "failed to prepare output file",
            -4 => "invalid Mach-O file",
            -5 => "failed to initialize signing assets",
            -6 => "signing failed",
            -101 => "output pointers are invalid",
            -102 => "input Mach-O buffer is empty",
            -103 => "failed to create temporary input file",
            -104 => "failed to create temporary cert file",
            -105 => "failed to create temporary private key file",
            -106 => "failed to create temporary provisioning file",
            -107 => "failed to create temporary entitlements file",
            -108 => "failed to read signed output file",
            -109 => "failed to allocate output buffer",
            -201 => "invalid bundle folder path",
            -202 => "non ad-hoc mode requires key and provisioning",
            -203 => "failed to initialize signing assets",
            -204 => "bundle signing failed",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cataloged_code_has_one_category() {
        let expected = [
            (-1, StatusCategory::InvalidInputPath),
            (-2, StatusCategory::MissingCredentials),
            (-3, StatusCategory::OutputPreparation),
            (-4, StatusCategory::InvalidBinary),
            (-5, StatusCategory::AssetInitialization),
            (-6, StatusCategory::SigningFailed),
            (-101, StatusCategory::InvalidOutputSlots),
            (-102, StatusCategory::EmptyInput),
            (-103, StatusCategory::StagingFile),
            (-104, StatusCategory::StagingFile),
            (-105, StatusCategory::StagingFile),
            (-106, StatusCategory::StagingFile),
            (-107, StatusCategory::StagingFile),
            (-108, StatusCategory::OutputRead),
            (-109, StatusCategory::OutputAllocation),
            (-201, StatusCategory::InvalidInputPath),
            (-202, StatusCategory::MissingCredentials),
            (-203, StatusCategory::AssetInitialization),
            (-204, StatusCategory::SigningFailed),
        ];
        for (code, category) in expected {
            assert_eq!(EngineStatus::from_code(code).category(), category, "code {code}");
        }
    }

    #[test]
    fn unlisted_codes_are_unknown() {
        for code in [-7, -100, -110, -200, -205, -999, 1, 42] {
            assert_eq!(EngineStatus::from_code(code).category(), StatusCategory::Unknown);
            assert_eq!(EngineStatus::from_code(code).description(), "unknown error");
        }
    }

    #[test]
    fn display_includes_code_and_description() {
        let status = EngineStatus::from_code(-202);
        assert_eq!(
            status.to_string(),
            "-202 (non ad-hoc mode requires key and provisioning)"
        );
    }
}
