//! Material (`.kmt`) loader
//!
//! `.kmt` files are line-oriented UTF-8 text: `key = value` pairs with
//! `#` comments. Recognized keys (case-insensitive): `version` (reserved),
//! `name`, `diffuse_map_name`, `diffuse_colour` (four space-separated
//! floats). Files resolve under `<base>/materials/<name>.kmt`.

use crate::foundation::math::Vec4;
use crate::renderer::types::MaterialConfig;
use crate::resources::{Resource, ResourceData, ResourceError, ResourceLoader, ResourceType};

const MAX_LINE_LENGTH: usize = 511;

/// Loads material configuration files.
#[derive(Debug, Default)]
pub struct MaterialLoader;

impl ResourceLoader for MaterialLoader {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Material
    }

    fn load(&self, name: &str, base_path: &str) -> Result<Resource, ResourceError> {
        // TODO: try extensions other than kmt
        let full_path = format!("{base_path}/materials/{name}.kmt");
        let text = std::fs::read_to_string(&full_path).map_err(|source| ResourceError::Io {
            path: full_path.clone(),
            source,
        })?;

        let config = parse_kmt(&text, &full_path);

        Ok(Resource {
            name: name.to_string(),
            full_path,
            data: ResourceData::Material(config),
            ..Resource::default()
        })
    }
}

/// Parses `.kmt` text into a material configuration. Unrecognized keys
/// and malformed lines are skipped with a warning; a missing or invalid
/// `diffuse_colour` falls back to white.
pub(crate) fn parse_kmt(text: &str, path: &str) -> MaterialConfig {
    let mut config = MaterialConfig::default();

    for (line_number, raw_line) in text.lines().enumerate() {
        let line_number = line_number + 1;
        if raw_line.len() > MAX_LINE_LENGTH {
            log::warn!(
                "Line {line_number} of '{path}' exceeds {MAX_LINE_LENGTH} bytes and was skipped."
            );
            continue;
        }

        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((raw_key, raw_value)) = trimmed.split_once('=') else {
            log::warn!(
                "Potential formatting issue in '{path}': '=' token not found. Skipping line {line_number}."
            );
            continue;
        };
        let key = raw_key.trim().to_lowercase();
        let value = raw_value.trim();

        match key.as_str() {
            "version" => {
                // TODO: versioned material files
            }
            "name" => config.name = value.to_string(),
            "diffuse_map_name" => config.diffuse_map_name = value.to_string(),
            "diffuse_colour" => match parse_vec4(value) {
                Some(colour) => config.diffuse_colour = colour,
                None => {
                    log::warn!(
                        "Error parsing diffuse_colour in '{path}'. Using default of white instead."
                    );
                    config.diffuse_colour = Vec4::new(1.0, 1.0, 1.0, 1.0);
                }
            },
            _ => {}
        }
    }

    config
}

fn parse_vec4(value: &str) -> Option<Vec4> {
    let mut parts = value.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    let w = parts.next()?.parse().ok()?;
    Some(Vec4::new(x, y, z, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_full_material() {
        let text = "# comment\nname = stone\ndiffuse_colour = 1.0 0.5 0.25 1.0\ndiffuse_map_name=stone_diffuse\n";
        let config = parse_kmt(text, "test.kmt");
        assert_eq!(config.name, "stone");
        assert_eq!(config.diffuse_map_name, "stone_diffuse");
        assert_relative_eq!(config.diffuse_colour.x, 1.0);
        assert_relative_eq!(config.diffuse_colour.y, 0.5);
        assert_relative_eq!(config.diffuse_colour.z, 0.25);
        assert_relative_eq!(config.diffuse_colour.w, 1.0);
    }

    #[test]
    fn test_missing_colour_defaults_to_white() {
        let config = parse_kmt("name = flat\n", "test.kmt");
        assert_eq!(config.diffuse_colour, Vec4::new(1.0, 1.0, 1.0, 1.0));
        assert!(config.diffuse_map_name.is_empty());
    }

    #[test]
    fn test_invalid_colour_defaults_to_white() {
        let config = parse_kmt("diffuse_colour = 1.0 oops 0.0 1.0\n", "test.kmt");
        assert_eq!(config.diffuse_colour, Vec4::new(1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn test_keys_are_case_insensitive_and_whitespace_tolerant() {
        let config = parse_kmt("  NAME   =   brick  \nDIFFUSE_MAP_NAME = brick_d\n", "t.kmt");
        assert_eq!(config.name, "brick");
        assert_eq!(config.diffuse_map_name, "brick_d");
    }

    #[test]
    fn test_comments_blanks_and_unknown_keys_are_skipped() {
        let text = "\n# a comment\n   \nshininess = 4\nname=x\nno_equals_line\n";
        let config = parse_kmt(text, "t.kmt");
        assert_eq!(config.name, "x");
    }

    #[test]
    fn test_round_trip_of_recognized_keys() {
        let original = MaterialConfig {
            name: "metal".to_string(),
            diffuse_map_name: "metal_d".to_string(),
            diffuse_colour: Vec4::new(0.25, 0.5, 0.75, 1.0),
            ..MaterialConfig::default()
        };
        let text = format!(
            "name = {}\ndiffuse_map_name = {}\ndiffuse_colour = {} {} {} {}\n",
            original.name,
            original.diffuse_map_name,
            original.diffuse_colour.x,
            original.diffuse_colour.y,
            original.diffuse_colour.z,
            original.diffuse_colour.w,
        );
        let parsed = parse_kmt(&text, "t.kmt");
        assert_eq!(parsed.name, original.name);
        assert_eq!(parsed.diffuse_map_name, original.diffuse_map_name);
        assert_eq!(parsed.diffuse_colour, original.diffuse_colour);
    }
}
