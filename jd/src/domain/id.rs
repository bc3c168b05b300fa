//! Job ID generation
//!
//! All IDs use the format: `{8-char-hex}-{type-slug}-{12-char-hex}`
//! Example: `0193a1f2-bias-analysis-8c41d2e07f3b`
//!
//! The prefix is the millisecond timestamp half of a UUIDv7, so IDs sort
//! roughly by creation time; the suffix is taken from its random half.

/// Slugify a job type for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Generate a job ID for the given job type
pub fn generate_id(job_type: &str) -> String {
    let simple = uuid::Uuid::now_v7().simple().to_string();
    let slug = slugify(job_type);
    let slug = if slug.is_empty() { "job".to_string() } else { slug };
    format!("{}-{}-{}", &simple[..8], slug, &simple[20..])
}

/// Job ID wrapper for type-safe ID handling
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Create a new job ID for a job type
    pub fn new(job_type: &str) -> Self {
        Self(generate_id(job_type))
    }

    /// Create from an existing ID string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the full ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the timestamp prefix (first 8 chars)
    pub fn hex_prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    /// Get the job type slug between the prefix and the random suffix
    pub fn type_slug(&self) -> Option<&str> {
        let start = self.0.find('-')?;
        let end = self.0.rfind('-')?;
        if end <= start {
            return None;
        }
        Some(&self.0[start + 1..end])
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}
