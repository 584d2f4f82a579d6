use serde::Deserialize;
use std::collections::BTreeSet;

use super::{PromptArguments, PromptError, PromptMetadata, PromptSource};

/// One prompt entry as written in a TOML or YAML prompt file.
#[derive(Debug, Deserialize)]
pub(super) struct RawPrompt {
    #[serde(alias = "text")]
    pub template: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Placeholders that must be supplied. Empty means all of them.
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(String),
}

/// A parsed `{placeholder}` template. `{{` and `}}` render as literal braces.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    template: String,
    segments: Vec<Segment>,
    placeholders: BTreeSet<String>,
    required: BTreeSet<String>,
    metadata: PromptMetadata,
}

impl PromptTemplate {
    pub(super) fn from_raw(
        key: String,
        raw: RawPrompt,
        source: PromptSource,
    ) -> Result<Self, PromptError> {
        let segments = parse_segments(&raw.template);
        let placeholders: BTreeSet<String> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(name) => Some(name.clone()),
                Segment::Text(_) => None,
            })
            .collect();

        let required = if raw.required.is_empty() {
            placeholders.clone()
        } else {
            raw.required
                .iter()
                .map(|argument| {
                    let argument = argument.trim().to_string();
                    if placeholders.contains(&argument) {
                        Ok(argument)
                    } else {
                        Err(PromptError::InvalidRequired {
                            key: key.clone(),
                            argument,
                        })
                    }
                })
                .collect::<Result<_, _>>()?
        };

        Ok(Self {
            key,
            template: raw.template,
            segments,
            placeholders,
            required,
            metadata: PromptMetadata {
                description: raw.description,
                source,
            },
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    pub fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn metadata(&self) -> &PromptMetadata {
        &self.metadata
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self
            .required
            .iter()
            .find(|name| !arguments.contains_key(name.as_str()))
        {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut output = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Slot(name) => {
                    output.push_str(arguments.get(name).map(String::as_str).unwrap_or_default())
                }
            }
        }
        Ok(output)
    }

    pub fn render_with<I, K, V>(&self, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: PromptArguments = arguments
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.render(&map)
    }
}

fn parse_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        text.push_str(&rest[..pos]);
        let brace = char::from(rest.as_bytes()[pos]);
        let after = &rest[pos + 1..];

        if after.starts_with(brace) {
            text.push(brace);
            rest = &after[1..];
            continue;
        }
        if brace == '}' {
            text.push('}');
            rest = after;
            continue;
        }

        match after.find('}') {
            Some(end) => {
                let name = after[..end].trim();
                if name.is_empty() {
                    text.push_str("{}");
                } else {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(name.to_string()));
                }
                rest = &after[end + 1..];
            }
            None => {
                text.push_str(&rest[pos..]);
                rest = "";
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}
