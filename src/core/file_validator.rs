//! Upload validation.
//!
//! Size, MIME type, extension and filename checks all run on every file;
//! a rejected upload reports every reason that applies.

use serde::{Deserialize, Serialize};

pub const FILE_TOO_LARGE_ERROR: &str = "File size exceeds maximum limit";
pub const DOUBLE_EXTENSION_ERROR: &str = "Files with double extensions are not allowed";
pub const SUSPICIOUS_FILENAME_ERROR: &str = "Suspicious filename detected";
pub const FILE_TYPE_NOT_ALLOWED_ERROR: &str = "File type not allowed";
pub const DANGEROUS_FILE_TYPE_ERROR: &str = "Potentially dangerous file type detected";

/// MIME types accepted for evidence uploads
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "text/plain",
    "text/csv",
];

/// Extensions rejected regardless of MIME type
pub const DANGEROUS_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".cmd", ".sh", ".ps1", ".vbs", ".js", ".jar", ".php", ".asp",
];

/// What the validator needs to know about an upload
pub trait FileDescriptor {
    fn name(&self) -> &str;
    fn mime_type(&self) -> &str;
    fn size(&self) -> u64;
}

/// Upload metadata as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
        }
    }
}

impl FileDescriptor for UploadedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Outcome of validating one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate an upload against the size cap and type rules
pub fn validate_file<F: FileDescriptor + ?Sized>(file: &F, max_size: u64) -> FileValidationResult {
    let mut errors = Vec::new();

    if file.size() > max_size {
        push_unique(&mut errors, FILE_TOO_LARGE_ERROR);
    }

    let mime = file.mime_type().trim().to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        push_unique(&mut errors, mime_rejection(&mime));
    }

    let name = file.name().to_ascii_lowercase();
    if let Some(ext) = DANGEROUS_EXTENSIONS.iter().find(|ext| name.ends_with(*ext)) {
        push_unique(&mut errors, extension_rejection(ext));
    }

    if name.contains("..") || name.matches('.').count() > 1 {
        push_unique(&mut errors, DOUBLE_EXTENSION_ERROR);
        push_unique(&mut errors, SUSPICIOUS_FILENAME_ERROR);
    }

    FileValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

fn mime_rejection(mime: &str) -> &'static str {
    if mime.contains("javascript") {
        "JavaScript files are not allowed"
    } else if mime.contains("vbscript") {
        "VBScript files are not allowed"
    } else if mime.contains("x-msdownload") {
        "Executable files are not allowed"
    } else {
        FILE_TYPE_NOT_ALLOWED_ERROR
    }
}

fn extension_rejection(ext: &str) -> &'static str {
    match ext {
        ".exe" => "Executable files are not allowed",
        ".bat" | ".cmd" => "Batch files are not allowed",
        ".sh" => "Shell scripts are not allowed",
        ".ps1" => "PowerShell scripts are not allowed",
        ".vbs" => "VBScript files are not allowed",
        ".js" => "JavaScript files are not allowed",
        _ => DANGEROUS_FILE_TYPE_ERROR,
    }
}

fn push_unique(errors: &mut Vec<String>, message: &str) {
    if !errors.iter().any(|e| e == message) {
        errors.push(message.to_string());
    }
}
