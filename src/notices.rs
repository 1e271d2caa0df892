//! Aggregated `THIRD-PARTY-NOTICES.txt` at the VMR root

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use regex::Regex;

use crate::dependency_tracker::DependencyTracker;
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::vmr_info::VmrInfo;

const NOTICE_FILE_PATTERN: &str = r"(?i)^third-party-notices(\.txt)?$";
const BANNER_WIDTH: usize = 45;

pub struct ThirdPartyNoticesGenerator {
    vmr_info: VmrInfo,
    tracker: Arc<DependencyTracker>,
    fs: Arc<dyn FileSystem>,
}

impl ThirdPartyNoticesGenerator {
    pub fn new(vmr_info: VmrInfo, tracker: Arc<DependencyTracker>, fs: Arc<dyn FileSystem>) -> Self {
        Self { vmr_info, tracker, fs }
    }

    /// Regenerate the VMR-root notices from `template` and the notices of
    /// every mapping.
    pub fn update_third_party_notices(&self, template: &Path) -> Result<()> {
        let pattern = Regex::new(NOTICE_FILE_PATTERN)?;
        let mut content = if self.fs.file_exists(template) {
            self.fs.read_to_string(template)?
        } else {
            debug!("No notices template at {}", template.display());
            String::new()
        };

        let mut notices = Vec::new();
        for mapping in self.tracker.mappings()? {
            let sources = self.vmr_info.repo_sources_path(&mapping.name);
            if !self.fs.dir_exists(&sources) {
                continue;
            }
            notices.extend(self.fs.list_files(&sources)?.into_iter().filter(|file| {
                file.file_name()
                    .map(|name| pattern.is_match(&name.to_string_lossy()))
                    .unwrap_or(false)
            }));
        }
        notices.sort();

        let banner = "#".repeat(BANNER_WIDTH);
        for notice in &notices {
            let mapping = notice
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!("Adding notices of {} from {}", mapping, notice.display());
            content.push_str(&format!(
                "\n{banner}\n### {mapping}\n{banner}\n\n{}\n\n",
                self.fs.read_to_string(notice)?
            ));
        }

        let output = self.vmr_info.third_party_notices_path();
        self.fs.write(&output, &content)?;
        info!("{} updated with {} notice file(s)", output.display(), notices.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::source_mapping::SourceMappingParser;
    use tempfile::TempDir;

    const MAPPINGS: &str = r#"{
  "mappings": [
    { "name": "beta", "defaultRemote": "https://github.com/dotnet/beta" },
    { "name": "alpha", "defaultRemote": "https://github.com/dotnet/alpha" },
    { "name": "gamma", "defaultRemote": "https://github.com/dotnet/gamma" }
  ]
}"#;

    fn generator(temp: &TempDir) -> (ThirdPartyNoticesGenerator, VmrInfo) {
        let info = VmrInfo::new(temp.path().join("vmr"), temp.path().join("tmp"));
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        fs.write(&info.default_mappings_path(), MAPPINGS).unwrap();
        let tracker = Arc::new(DependencyTracker::new(
            info.clone(),
            SourceMappingParser::new(info.clone(), fs.clone()),
            fs.clone(),
        ));
        tracker.refresh_metadata(None).unwrap();
        (ThirdPartyNoticesGenerator::new(info.clone(), tracker, fs), info)
    }

    #[test]
    fn test_no_template_and_no_notices_writes_empty_file() {
        let temp = TempDir::new().unwrap();
        let (generator, info) = generator(&temp);

        generator.update_third_party_notices(&temp.path().join("missing.txt")).unwrap();

        assert_eq!(std::fs::read_to_string(info.third_party_notices_path()).unwrap(), "");
    }

    #[test]
    fn test_header_and_sections_in_path_order() {
        let temp = TempDir::new().unwrap();
        let (generator, info) = generator(&temp);
        let template = temp.path().join("TEMPLATE.txt");
        std::fs::write(&template, "HEADER LINE\n").unwrap();
        let fs = LocalFileSystem::new();
        fs.write(&info.repo_sources_path("beta").join("third-party-notices"), "BETA LICENSE").unwrap();
        fs.write(&info.repo_sources_path("alpha").join("THIRD-PARTY-NOTICES.TXT"), "ALPHA LICENSE").unwrap();
        fs.write(&info.repo_sources_path("alpha").join("README.md"), "readme").unwrap();
        fs.write(&info.repo_sources_path("gamma").join("docs/THIRD-PARTY-NOTICES.txt"), "nested").unwrap();

        generator.update_third_party_notices(&template).unwrap();

        let content = std::fs::read_to_string(info.third_party_notices_path()).unwrap();
        assert!(content.starts_with("HEADER LINE\n"));
        assert!(content.contains(&"#".repeat(45)));
        let alpha = content.find("### alpha").unwrap();
        let beta = content.find("### beta").unwrap();
        assert!(alpha < beta);
        assert!(content.contains("ALPHA LICENSE"));
        assert!(content.contains("BETA LICENSE"));
        assert!(!content.contains("readme"));
        assert!(!content.contains("nested"));
    }
}
