//! Asset reference parsing
//!
//! Scene attributes hold asset references in a handful of shapes:
//! external URLs (`https://host/path/file.mesh`), local paths
//! (`file:///...`, `/abs/path`, `C:\...`), protocol refs
//! (`local://file.png`, `generated://name.material`) and relative paths
//! (`models/file.mesh`). Any of them may address a sub-asset inside a bundle
//! with `#` (`bundle.zip#textures/file.png`).

use url::Url;

/// Shape of an asset reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// `scheme://host/...` with a network scheme
    ExternalUrl,
    /// `file://`, absolute unix path or drive-letter path
    LocalPath,
    /// Non-network protocol such as `local://` or `generated://`
    Protocol,
    /// Path relative to the scene's storage
    Relative,
}

/// Parsed asset reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRef {
    /// Shape of the reference
    pub kind: RefKind,
    /// Reference without the `#sub-asset` part
    pub main_asset: String,
    /// Directory part of the main asset, with trailing `/` (may be empty)
    pub base_path: String,
    /// File name of the main asset
    pub file_name: String,
    /// Sub-asset name inside a bundle
    pub sub_asset: Option<String>,
}

const NETWORK_SCHEMES: &[&str] = &["http", "https", "ftp", "s3"];

impl ParsedRef {
    /// Parse a reference string. Never fails: unknown shapes are relative.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let (main_asset, sub_asset) = match reference.split_once('#') {
            Some((main, sub)) if !sub.is_empty() => (main.to_string(), Some(sub.to_string())),
            Some((main, _)) => (main.to_string(), None),
            None => (reference.to_string(), None),
        };

        let kind = classify(&main_asset);
        let normalized = main_asset.replace('\\', "/");
        let (base_path, file_name) = match normalized.rfind('/') {
            Some(pos) => (normalized[..=pos].to_string(), normalized[pos + 1..].to_string()),
            None => (String::new(), normalized.clone()),
        };
        // `scheme://file` has no directory of its own
        let base_path = if kind == RefKind::Protocol && base_path.ends_with("://") {
            String::new()
        } else {
            base_path
        };

        Self {
            kind,
            main_asset,
            base_path,
            file_name,
            sub_asset,
        }
    }

    /// File name that should be used when copying this asset: the last
    /// segment of the sub-asset if present, else the main file name.
    /// Spaces are replaced with underscores.
    #[must_use]
    pub fn bundle_file_name(&self) -> String {
        let name = match &self.sub_asset {
            Some(sub) if !sub.trim().is_empty() => sub.trim(),
            _ => self.file_name.trim(),
        };
        let last = name.rsplit('/').find(|s| !s.is_empty()).unwrap_or(name);
        last.replace(' ', "_")
    }

    /// Lowercased file extension of the addressed file
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.bundle_file_name();
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    /// Host origin (`scheme://host[:port]`) and directory path of an
    /// external URL, e.g. `("https://cdn.example.com", "/assets/models/")`.
    #[must_use]
    pub fn url_origin_and_dir(&self) -> Option<(String, String)> {
        if self.kind != RefKind::ExternalUrl {
            return None;
        }
        let url = Url::parse(&self.main_asset).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let origin = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        let path = url.path();
        let dir = match path.rfind('/') {
            Some(pos) => path[..=pos].to_string(),
            None => "/".to_string(),
        };
        Some((origin, dir))
    }
}

fn classify(main_asset: &str) -> RefKind {
    if let Some((scheme, _)) = main_asset.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if scheme == "file" {
            return RefKind::LocalPath;
        }
        if NETWORK_SCHEMES.contains(&scheme.as_str()) {
            return RefKind::ExternalUrl;
        }
        return RefKind::Protocol;
    }
    let bytes = main_asset.as_bytes();
    let drive_letter = bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\');
    if main_asset.starts_with('/') || drive_letter {
        RefKind::LocalPath
    } else {
        RefKind::Relative
    }
}

/// Resolve a reference found inside another asset (for example a texture
/// name inside a material script) against the referencing asset.
#[must_use]
pub fn resolve_relative(context: &str, reference: &str) -> String {
    let reference = reference.trim();
    let target = ParsedRef::parse(reference);
    if target.kind != RefKind::Relative {
        return reference.to_string();
    }

    let ctx = ParsedRef::parse(context);
    if let Some(sub) = &ctx.sub_asset {
        let sub_dir = sub.rfind('/').map(|p| &sub[..=p]).unwrap_or("");
        return format!("{}#{}{}", ctx.main_asset, sub_dir, reference);
    }
    match ctx.kind {
        RefKind::ExternalUrl => Url::parse(&ctx.main_asset)
            .and_then(|base| base.join(reference))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", ctx.base_path, reference)),
        _ => format!("{}{}", ctx.base_path, reference),
    }
}

/// Strip the scene's storage base URL from a reference, for display.
#[must_use]
pub fn trim_base_url<'a>(reference: &'a str, base_url: &str) -> &'a str {
    if base_url.is_empty() {
        return reference;
    }
    reference.strip_prefix(base_url).unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_external_url() {
        let parsed = ParsedRef::parse("https://cdn.example.com/assets/models/car.mesh");
        assert_eq!(parsed.kind, RefKind::ExternalUrl);
        assert_eq!(parsed.file_name, "car.mesh");
        assert_eq!(parsed.base_path, "https://cdn.example.com/assets/models/");
        assert_eq!(
            parsed.url_origin_and_dir(),
            Some(("https://cdn.example.com".to_string(), "/assets/models/".to_string()))
        );
    }

    #[test]
    fn bucket_urls_are_keyed_by_host() {
        let east = ParsedRef::parse("s3://east-bucket/meshes/car.mesh");
        let west = ParsedRef::parse("s3://west-bucket/meshes/car.mesh");
        assert_eq!(
            east.url_origin_and_dir(),
            Some(("s3://east-bucket".to_string(), "/meshes/".to_string()))
        );
        assert_ne!(
            east.url_origin_and_dir().map(|(host, _)| host),
            west.url_origin_and_dir().map(|(host, _)| host)
        );
        assert_eq!(
            ParsedRef::parse("http://cdn.example.com:8080/a.mesh").url_origin_and_dir(),
            Some(("http://cdn.example.com:8080".to_string(), "/".to_string()))
        );
    }

    #[test]
    fn parses_relative_with_folder() {
        let parsed = ParsedRef::parse("models/big car.mesh");
        assert_eq!(parsed.kind, RefKind::Relative);
        assert_eq!(parsed.base_path, "models/");
        assert_eq!(parsed.bundle_file_name(), "big_car.mesh");
        assert_eq!(parsed.extension().as_deref(), Some("mesh"));
    }

    #[test]
    fn parses_sub_asset() {
        let parsed = ParsedRef::parse("scene-textures-1.zip#stone/wall.DDS");
        assert_eq!(parsed.main_asset, "scene-textures-1.zip");
        assert_eq!(parsed.sub_asset.as_deref(), Some("stone/wall.DDS"));
        assert_eq!(parsed.bundle_file_name(), "wall.DDS");
        assert_eq!(parsed.extension().as_deref(), Some("dds"));
    }

    #[test]
    fn classifies_local_and_protocol_refs() {
        assert_eq!(ParsedRef::parse("/tmp/a.png").kind, RefKind::LocalPath);
        assert_eq!(ParsedRef::parse("C:\\data\\a.png").kind, RefKind::LocalPath);
        assert_eq!(ParsedRef::parse("file:///tmp/a.png").kind, RefKind::LocalPath);

        let generated = ParsedRef::parse("generated://glow.material");
        assert_eq!(generated.kind, RefKind::Protocol);
        assert_eq!(generated.base_path, "");
        assert_eq!(generated.file_name, "glow.material");
    }

    #[test]
    fn resolves_texture_against_material() {
        assert_eq!(
            resolve_relative("https://h.com/mats/rock.material", "rock.png"),
            "https://h.com/mats/rock.png"
        );
        assert_eq!(resolve_relative("mats/rock.material", "rock.png"), "mats/rock.png");
        assert_eq!(
            resolve_relative("pack.zip#mats/rock.material", "rock.png"),
            "pack.zip#mats/rock.png"
        );
        assert_eq!(
            resolve_relative("mats/rock.material", "https://other.com/x.png"),
            "https://other.com/x.png"
        );
    }

    #[test]
    fn trims_base_url_only_when_prefixed() {
        let base = "https://storage.example.com/world/";
        assert_eq!(trim_base_url("https://storage.example.com/world/a.mesh", base), "a.mesh");
        assert_eq!(trim_base_url("https://else.com/a.mesh", base), "https://else.com/a.mesh");
    }
}
