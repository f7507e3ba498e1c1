//! Custom error types for samprep operations.

use thiserror::Error;

/// Result type alias for samprep operations
pub type Result<T> = std::result::Result<T, SamprepError>;

/// Error type for samprep operations
#[derive(Error, Debug)]
pub enum SamprepError {
    /// A mandatory column is missing from an alignment line
    #[error("Missing {field} column in SAM alignment line")]
    MissingColumn {
        /// The column name (e.g., "FLAG", "POS")
        field: &'static str,
    },

    /// A numeric field failed to parse
    #[error("Invalid {field} field '{value}': not a valid number")]
    MalformedNumber {
        /// The field name
        field: &'static str,
        /// The offending text
        value: String,
    },

    /// A CIGAR string failed to parse
    #[error("Invalid CIGAR string '{cigar}': {reason}")]
    InvalidCigar {
        /// The raw CIGAR text
        cigar: String,
        /// Explanation of the problem
        reason: &'static str,
    },

    /// The same tag appeared twice on one record or header line
    #[error("Duplicate tag '{tag}' in SAM {context}")]
    DuplicateTag {
        /// The two-character tag
        tag: String,
        /// "alignment line" or "header line"
        context: &'static str,
    },

    /// An optional field carried an unknown TYPE code
    #[error("Unknown optional field type '{type_code}' for tag '{tag}'")]
    UnknownTagType {
        /// The TYPE code character
        type_code: char,
        /// The two-character tag
        tag: String,
    },

    /// An optional field was structurally malformed
    #[error("Malformed optional field '{text}': {reason}")]
    MalformedTagField {
        /// The offending text
        text: String,
        /// Explanation of the problem
        reason: &'static str,
    },

    /// The header section was malformed
    #[error("Invalid SAM header: {reason}")]
    InvalidHeader {
        /// Explanation of the problem
        reason: String,
    },

    /// An @RG line declares a library but no ID (fatal before processing)
    #[error("Missing mandatory ID entry in an @RG line in a SAM file header")]
    MissingReadGroupId,

    /// The requested sorting order is not one of the known values
    #[error("Unknown sorting order '{value}'")]
    UnknownSortingOrder {
        /// The offending text
        value: String,
    },

    /// I/O failure while reading or writing SAM text
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
