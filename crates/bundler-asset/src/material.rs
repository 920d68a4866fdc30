//! Material script texture slots
//!
//! Material scripts are block structured text:
//!
//! ```text
//! material Rock
//! {
//!     technique
//!     {
//!         pass
//!         {
//!             texture_unit
//!             {
//!                 texture rock_diffuse.png
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! Only `texture` lines inside `texture_unit` blocks are slots. Everything
//! else is kept byte for byte when the script is rendered back.

use crate::error::MaterialError;
use std::path::Path;

/// One `texture` line inside a texture unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    /// Technique block index
    pub technique: usize,
    /// Pass index inside the technique
    pub pass: usize,
    /// Texture unit index inside the pass
    pub unit: usize,
    /// Referenced texture, unquoted
    pub texture_ref: String,
    line: usize,
    quoted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Technique,
    Pass,
    TextureUnit,
    Other,
}

/// Parsed material script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialScript {
    lines: Vec<String>,
    slots: Vec<TextureSlot>,
    trailing_newline: bool,
}

impl MaterialScript {
    /// Parse a script and collect its texture slots
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut slots = Vec::new();
        let mut stack: Vec<Block> = Vec::new();
        let mut pending = Block::Other;
        let (mut technique, mut pass, mut unit) = (0usize, 0usize, 0usize);
        let (mut seen_technique, mut seen_pass, mut seen_unit) = (false, false, false);

        for (line_no, raw) in lines.iter().enumerate() {
            let mut rest = strip_comment(raw).trim();
            while !rest.is_empty() {
                if let Some(after) = rest.strip_prefix('{') {
                    let block = std::mem::replace(&mut pending, Block::Other);
                    match block {
                        Block::Technique => {
                            if seen_technique {
                                technique += 1;
                            }
                            seen_technique = true;
                            pass = 0;
                            seen_pass = false;
                        }
                        Block::Pass => {
                            if seen_pass {
                                pass += 1;
                            }
                            seen_pass = true;
                            unit = 0;
                            seen_unit = false;
                        }
                        Block::TextureUnit => {
                            if seen_unit {
                                unit += 1;
                            }
                            seen_unit = true;
                        }
                        Block::Other => {}
                    }
                    stack.push(block);
                    rest = after.trim_start();
                    continue;
                }
                if let Some(after) = rest.strip_prefix('}') {
                    stack.pop();
                    rest = after.trim_start();
                    continue;
                }

                let end = rest.find(&['{', '}'][..]).unwrap_or(rest.len());
                let statement = rest[..end].trim();
                let keyword = statement.split_whitespace().next().unwrap_or("");
                match keyword {
                    "technique" => pending = Block::Technique,
                    "pass" => pending = Block::Pass,
                    "texture_unit" => pending = Block::TextureUnit,
                    "texture" if stack.last() == Some(&Block::TextureUnit) => {
                        if let Some((texture_ref, quoted)) = texture_argument(statement) {
                            slots.push(TextureSlot {
                                technique,
                                pass,
                                unit,
                                texture_ref,
                                line: line_no,
                                quoted,
                            });
                        }
                    }
                    _ => {}
                }
                rest = rest[end..].trim_start();
            }
        }

        Self {
            lines,
            slots,
            trailing_newline: text.ends_with('\n'),
        }
    }

    /// Texture slots in file order
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[TextureSlot] {
        &self.slots
    }

    /// Replace the texture reference of slot `index`
    pub fn set_texture(&mut self, index: usize, new_ref: &str) -> Result<(), MaterialError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(MaterialError::NoSuchSlot(index))?;
        let line = &mut self.lines[slot.line];
        let old = if slot.quoted {
            format!("\"{}\"", slot.texture_ref)
        } else {
            slot.texture_ref.clone()
        };
        let replacement = if new_ref.contains(' ') {
            format!("\"{new_ref}\"")
        } else {
            new_ref.to_string()
        };

        // the argument follows the `texture` keyword
        let keyword_at = line.find("texture").unwrap_or(0);
        if let Some(offset) = line[keyword_at + "texture".len()..].find(&old) {
            let start = keyword_at + "texture".len() + offset;
            line.replace_range(start..start + old.len(), &replacement);
        }
        slot.texture_ref = new_ref.to_string();
        slot.quoted = new_ref.contains(' ');
        Ok(())
    }

    /// Script text with every slot change applied
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        if self.trailing_newline {
            text.push('\n');
        }
        text
    }

    /// Read and parse a script file
    pub async fn load(path: &Path) -> Result<Self, MaterialError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MaterialError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&text))
    }

    /// Write the rendered script
    pub async fn save(&self, path: &Path) -> Result<(), MaterialError> {
        tokio::fs::write(path, self.render())
            .await
            .map_err(|source| MaterialError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// `//` starts a comment unless it is part of a URL scheme
fn strip_comment(line: &str) -> &str {
    let mut search = 0;
    while let Some(found) = line[search..].find("//") {
        let at = search + found;
        if at == 0 || !line[..at].ends_with(':') {
            return &line[..at];
        }
        search = at + 2;
    }
    line
}

fn texture_argument(statement: &str) -> Option<(String, bool)> {
    let args = statement.strip_prefix("texture")?.trim_start();
    if let Some(quoted) = args.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some((quoted[..end].to_string(), true));
    }
    args.split_whitespace()
        .next()
        .map(|token| (token.to_string(), false))
}
