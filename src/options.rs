//! Per-document conversion options.
//!
//! Callers send [`OptionOverrides`] (every field optional) on two levels:
//! per file and globally. The request normaliser folds them into one
//! canonical [`ConversionOptions`] per file with
//! [`OptionOverrides::resolve`], so nothing downstream ever sees an unset
//! field.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Canonical, fully-resolved options for one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOptions {
    pub output_format: OutputFormat,
    pub extract_images: bool,
    pub remove_header_footer: bool,
    pub include_content: bool,
    pub paginate: bool,
    pub page_range: PageRange,
    pub languages: Languages,
    /// Word: keep bold/italic emphasis.
    pub preserve_formatting: bool,
    /// Excel: append formula listings to each sheet.
    pub include_formulas: bool,
    /// Excel: restrict to these sheets (all when `None`).
    pub sheet_names: Option<Vec<String>>,
    /// Fail the job instead of dropping an image the store cannot write.
    pub images_mandatory: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Markdown,
            extract_images: true,
            remove_header_footer: true,
            include_content: true,
            paginate: true,
            page_range: PageRange::default(),
            languages: Languages::Auto,
            preserve_formatting: true,
            include_formulas: true,
            sheet_names: None,
            images_mandatory: false,
        }
    }
}

/// Rendering target for the assembled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, ConvertError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(ConvertError::validation(
                "output_format",
                format!("unknown value '{other}' (expected markdown, html or json)"),
            )),
        }
    }

    /// File extension used when writing this format to disk.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
        })
    }
}

/// Half-open, zero-based range of pages (or sheets) to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PageRange {
    /// First unit to convert (inclusive).
    pub start: usize,
    /// One past the last unit to convert; `None` runs to the end.
    pub end: Option<usize>,
}

impl PageRange {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && self.end.is_none_or(|end| index < end)
    }

    /// The selected indices clipped to a document of `total` units.
    pub fn clip(&self, total: usize) -> std::ops::Range<usize> {
        let end = self.end.map_or(total, |e| e.min(total));
        self.start.min(end)..end
    }
}

/// Languages used for language-aware parsing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Languages {
    /// Detect from a text sample (PDF only).
    #[default]
    Auto,
    /// Caller-declared codes, in priority order.
    Declared(Vec<String>),
}

impl Languages {
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }

    pub fn codes(&self) -> &[String] {
        match self {
            Self::Auto => &[],
            Self::Declared(codes) => codes,
        }
    }
}

impl Serialize for Languages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Declared(codes) => codes.serialize(serializer),
        }
    }
}

/// A languages field as callers send it: `"auto"`, `"en,fr"` or `["en","fr"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguagesInput {
    One(String),
    Many(Vec<String>),
}

impl LanguagesInput {
    fn resolve(&self) -> Result<Languages, ConvertError> {
        let codes: Vec<String> = match self {
            Self::One(s) => s.split(',').map(|c| c.trim().to_string()).collect(),
            Self::Many(v) => v.iter().map(|c| c.trim().to_string()).collect(),
        };
        if codes.is_empty() {
            return Err(ConvertError::validation("languages", "must not be empty"));
        }
        if codes.iter().any(|c| c.eq_ignore_ascii_case("auto")) {
            return Ok(Languages::Auto);
        }
        if let Some(bad) = codes.iter().find(|c| !is_language_code(c)) {
            return Err(ConvertError::validation(
                "languages",
                format!("'{bad}' is not a language code"),
            ));
        }
        Ok(Languages::Declared(
            codes.into_iter().map(|c| c.to_ascii_lowercase()).collect(),
        ))
    }
}

fn is_language_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 8
        && code
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '-' || c == '_')
}

/// Option fields as supplied by a caller; every field may be absent.
///
/// Numeric fields are signed so that out-of-domain values (negative page
/// indices) reach validation instead of failing deserialisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionOverrides {
    pub output_format: Option<String>,
    pub extract_images: Option<bool>,
    pub remove_header_footer: Option<bool>,
    pub include_content: Option<bool>,
    #[serde(alias = "paginate_output")]
    pub paginate: Option<bool>,
    pub start_page: Option<i64>,
    pub end_page: Option<i64>,
    pub languages: Option<LanguagesInput>,
    pub preserve_formatting: Option<bool>,
    pub include_formulas: Option<bool>,
    pub sheet_names: Option<Vec<String>>,
    pub images_mandatory: Option<bool>,
}

impl OptionOverrides {
    /// Fold `self` (per-file) over `global` over the defaults.
    ///
    /// A per-file value always wins; a global value fills gaps; anything
    /// still unset takes the documented default.
    pub fn resolve(&self, global: &OptionOverrides) -> Result<ConversionOptions, ConvertError> {
        let defaults = ConversionOptions::default();

        let output_format = match self.output_format.as_ref().or(global.output_format.as_ref()) {
            Some(s) => OutputFormat::parse(s)?,
            None => defaults.output_format,
        };

        let start = match self.start_page.or(global.start_page) {
            Some(s) if s < 0 => {
                return Err(ConvertError::validation(
                    "start_page",
                    format!("must be ≥ 0, got {s}"),
                ))
            }
            Some(s) => s as usize,
            None => defaults.page_range.start,
        };
        let end = match self.end_page.or(global.end_page) {
            Some(e) if e < 0 => {
                return Err(ConvertError::validation(
                    "end_page",
                    format!("must be ≥ 0, got {e}"),
                ))
            }
            Some(e) if (e as usize) <= start => {
                return Err(ConvertError::validation(
                    "end_page",
                    format!("must be greater than start_page ({start}), got {e}"),
                ))
            }
            Some(e) => Some(e as usize),
            None => defaults.page_range.end,
        };

        let languages = match self.languages.as_ref().or(global.languages.as_ref()) {
            Some(l) => l.resolve()?,
            None => defaults.languages,
        };

        let sheet_names = match self.sheet_names.as_ref().or(global.sheet_names.as_ref()) {
            Some(names) if names.iter().any(|n| n.trim().is_empty()) => {
                return Err(ConvertError::validation(
                    "sheet_names",
                    "sheet names must not be blank",
                ))
            }
            Some(names) if names.is_empty() => None,
            Some(names) => Some(names.clone()),
            None => defaults.sheet_names,
        };

        Ok(ConversionOptions {
            output_format,
            extract_images: pick(self.extract_images, global.extract_images, defaults.extract_images),
            remove_header_footer: pick(
                self.remove_header_footer,
                global.remove_header_footer,
                defaults.remove_header_footer,
            ),
            include_content: pick(self.include_content, global.include_content, defaults.include_content),
            paginate: pick(self.paginate, global.paginate, defaults.paginate),
            page_range: PageRange::new(start, end),
            languages,
            preserve_formatting: pick(
                self.preserve_formatting,
                global.preserve_formatting,
                defaults.preserve_formatting,
            ),
            include_formulas: pick(self.include_formulas, global.include_formulas, defaults.include_formulas),
            sheet_names,
            images_mandatory: pick(self.images_mandatory, global.images_mandatory, defaults.images_mandatory),
        })
    }
}

fn pick<T>(file: Option<T>, global: Option<T>, default: T) -> T {
    file.or(global).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_resolve_to_defaults() {
        let opts = OptionOverrides::default()
            .resolve(&OptionOverrides::default())
            .unwrap();
        assert_eq!(opts, ConversionOptions::default());
    }

    #[test]
    fn file_value_beats_global_value() {
        let file = OptionOverrides {
            output_format: Some("html".into()),
            extract_images: Some(false),
            ..Default::default()
        };
        let global = OptionOverrides {
            output_format: Some("json".into()),
            extract_images: Some(true),
            paginate: Some(false),
            ..Default::default()
        };
        let opts = file.resolve(&global).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Html);
        assert!(!opts.extract_images);
        // global fills the gap the file left
        assert!(!opts.paginate);
        // default fills what neither set
        assert!(opts.remove_header_footer);
    }

    #[test]
    fn negative_start_page_is_rejected() {
        let file = OptionOverrides {
            start_page: Some(-1),
            ..Default::default()
        };
        let err = file.resolve(&OptionOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("start_page"));
    }

    #[test]
    fn end_page_must_exceed_start_page() {
        let file = OptionOverrides {
            start_page: Some(3),
            end_page: Some(3),
            ..Default::default()
        };
        assert!(file.resolve(&OptionOverrides::default()).is_err());
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let global = OptionOverrides {
            output_format: Some("rtf".into()),
            ..Default::default()
        };
        let err = OptionOverrides::default().resolve(&global).unwrap_err();
        assert!(err.to_string().contains("rtf"));
    }

    #[test]
    fn languages_accept_string_list_and_auto() {
        let csv = LanguagesInput::One("EN, fr".into()).resolve().unwrap();
        assert_eq!(csv, Languages::Declared(vec!["en".into(), "fr".into()]));
        let auto = LanguagesInput::Many(vec!["auto".into()]).resolve().unwrap();
        assert!(auto.is_auto());
        assert!(LanguagesInput::Many(vec![]).resolve().is_err());
        assert!(LanguagesInput::One("en;drop".into()).resolve().is_err());
    }

    #[test]
    fn paginate_output_alias_deserialises() {
        let o: OptionOverrides =
            serde_json::from_str(r#"{"paginate_output": false, "languages": ["ru"]}"#).unwrap();
        assert_eq!(o.paginate, Some(false));
        assert_eq!(o.languages, Some(LanguagesInput::Many(vec!["ru".into()])));
    }

    #[test]
    fn page_range_clips_to_document() {
        let r = PageRange::new(2, Some(10));
        assert_eq!(r.clip(5), 2..5);
        assert!(r.contains(2));
        assert!(!r.contains(10));
        assert_eq!(PageRange::new(8, None).clip(5), 5..5);
    }

    #[test]
    fn languages_serialise_as_auto_or_list() {
        assert_eq!(serde_json::to_string(&Languages::Auto).unwrap(), "\"auto\"");
        assert_eq!(
            serde_json::to_string(&Languages::Declared(vec!["de".into()])).unwrap(),
            "[\"de\"]"
        );
    }
}
