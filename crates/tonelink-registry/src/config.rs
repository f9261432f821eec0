/// Controls how parameter tables are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum bytes accepted from a definition file.
    pub max_file_size: usize,
    /// Maximum number of parameters in one table.
    pub max_parameters: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024,
            max_parameters: 1024,
        }
    }
}
