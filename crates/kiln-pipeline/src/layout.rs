use crate::config::QuantizationScheme;

/// Artifact layout of one run inside the execution environment.
///
/// Paths are POSIX strings because they name locations in the environment,
/// not on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: String,
    extension: String,
}

impl OutputLayout {
    /// Resolves `output_dir` under `data_root`.
    #[must_use]
    pub fn new(data_root: &str, output_dir: &str, extension: &str) -> Self {
        Self { root: join(data_root, output_dir), extension: extension.to_string() }
    }

    /// The run's output directory.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn merged_model_dir(&self) -> String {
        join(&self.root, "merged_model")
    }

    /// `Merged.<ext>`
    #[must_use]
    pub fn converted_file_name(&self) -> String {
        format!("Merged.{}", self.extension)
    }

    #[must_use]
    pub fn converted_file(&self) -> String {
        join(&self.root, &self.converted_file_name())
    }

    /// `Merged<Scheme>.<ext>`
    #[must_use]
    pub fn quantized_file_name(&self, scheme: &QuantizationScheme) -> String {
        format!("Merged{}.{}", scheme.file_token(), self.extension)
    }

    #[must_use]
    pub fn quantized_file(&self, scheme: &QuantizationScheme) -> String {
        join(&self.root, &self.quantized_file_name(scheme))
    }

    #[must_use]
    pub fn descriptor_file(&self) -> String {
        join(&self.root, "Modelfile")
    }

    #[must_use]
    pub fn quantized_descriptor_file(&self, scheme: &QuantizationScheme) -> String {
        join(&self.root, &format!("Modelfile{}", scheme.file_token()))
    }
}

fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches("./");
    if base.is_empty() {
        child.to_string()
    } else {
        format!("{base}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("/var/data/", "run-1", "gguf");
        let scheme = QuantizationScheme::new("Q4_K_M");

        assert_eq!(layout.root(), "/var/data/run-1");
        assert_eq!(layout.merged_model_dir(), "/var/data/run-1/merged_model");
        assert_eq!(layout.converted_file(), "/var/data/run-1/Merged.gguf");
        assert_eq!(layout.quantized_file(&scheme), "/var/data/run-1/MergedQ4_K_M.gguf");
        assert_eq!(layout.descriptor_file(), "/var/data/run-1/Modelfile");
        assert_eq!(layout.quantized_descriptor_file(&scheme), "/var/data/run-1/ModelfileQ4_K_M");
    }

    #[test]
    fn test_layout_keeps_scheme_casing_in_names() {
        let layout = OutputLayout::new("/d", "o", "gguf");
        assert_eq!(layout.quantized_file_name(&QuantizationScheme::new("q8_0")), "Mergedq8_0.gguf");
    }

    #[test]
    fn test_layout_empty_root() {
        let layout = OutputLayout::new("", "outputs", "gguf");
        assert_eq!(layout.root(), "outputs");
    }
}
