use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".wabridge"))
            .unwrap_or_else(|| PathBuf::from(".wabridge"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Durable authentication record, overwritten wholesale on every
    /// state transition.
    pub fn session_file(&self) -> PathBuf {
        self.base.join("session.json")
    }

    /// Parent of all Chrome profile directories.
    pub fn profiles_dir(&self) -> PathBuf {
        self.base.join("profiles")
    }

    /// The known-good base profile that resume clones from.
    pub fn base_profile(&self) -> PathBuf {
        self.profiles_dir().join("base")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.profiles_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
