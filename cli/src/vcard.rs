// vCard-backed picker and extractor for the desktop CLI
//
// The terminal stands in for the platform picker: the user names a .vcf file
// and the first FN / TEL / EMAIL properties become the imported contact.

use async_trait::async_trait;
use contactbook_core::{ContactExtractor, ContactFields, ContactPicker, ExtractionError, PickOutcome, RecordRef};
use std::io::{BufRead, Write};
use std::path::PathBuf;

pub struct VcardPicker {
    preset: Option<PathBuf>,
}

impl VcardPicker {
    /// With a preset path no prompt is shown.
    pub fn new(preset: Option<PathBuf>) -> Self {
        Self { preset }
    }
}

#[async_trait]
impl ContactPicker for VcardPicker {
    async fn launch(&self) -> PickOutcome {
        if let Some(path) = &self.preset {
            return select_path(path.to_string_lossy().into_owned());
        }

        let answer = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
            let mut stdout = std::io::stdout();
            write!(stdout, "vCard file to import (empty to cancel): ")?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if line.trim().is_empty() => PickOutcome::Cancelled,
            Ok(Ok(line)) => select_path(line.trim().to_string()),
            Ok(Err(e)) => PickOutcome::Failed(format!("Failed to read input: {}", e)),
            Err(e) => PickOutcome::Failed(format!("Prompt task failed: {}", e)),
        }
    }
}

fn select_path(path: String) -> PickOutcome {
    if std::path::Path::new(&path).is_file() {
        PickOutcome::Selected(RecordRef::new(path))
    } else {
        PickOutcome::Failed(format!("No such file: {}", path))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VcardExtractor;

impl ContactExtractor for VcardExtractor {
    fn extract(&self, record: &RecordRef) -> Result<ContactFields, ExtractionError> {
        let text = std::fs::read_to_string(record.as_str())
            .map_err(|e| ExtractionError(format!("Failed to read {}: {}", record, e)))?;
        parse_vcard(&text)
    }
}

/// Pull the first contact's name, phone and email out of vCard text.
pub fn parse_vcard(text: &str) -> Result<ContactFields, ExtractionError> {
    let mut formatted_name = None;
    let mut structured_name = None;
    let mut phone = None;
    let mut email = None;

    for line in unfold(text) {
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let property = head.split(';').next().unwrap_or_default();
        // Strip an optional group prefix such as "item1.".
        let property = property.rsplit('.').next().unwrap_or(property).to_ascii_uppercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match property.as_str() {
            "FN" => {
                formatted_name.get_or_insert_with(|| value.to_string());
            }
            "N" => {
                structured_name.get_or_insert_with(|| join_structured_name(value));
            }
            "TEL" => {
                phone.get_or_insert_with(|| value.to_string());
            }
            "EMAIL" => {
                email.get_or_insert_with(|| value.to_string());
            }
            "END" if value.eq_ignore_ascii_case("VCARD") => break,
            _ => {}
        }
    }

    let name = formatted_name
        .or(structured_name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ExtractionError("vCard has no name".to_string()))?;
    let phone_number = phone.ok_or_else(|| ExtractionError("vCard has no phone number".to_string()))?;
    let email = email.ok_or_else(|| ExtractionError("vCard has no email".to_string()))?;

    Ok(ContactFields {
        name,
        phone_number,
        email,
    })
}

/// Joins continuation lines (RFC 6350 folding) back onto their property.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

/// "Doe;John;;;" -> "John Doe"
fn join_structured_name(value: &str) -> String {
    let mut parts = value.split(';');
    let family = parts.next().unwrap_or_default().trim();
    let given = parts.next().unwrap_or_default().trim();
    [given, family]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
