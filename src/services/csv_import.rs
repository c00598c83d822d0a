//! CSV patient import: parsing and per-row validation.
//!
//! This is the validation half of the two-phase import. Everything here is
//! a function of the file content alone; the job lifecycle and the actual
//! writes live in `import_pipeline`.

use chrono::{Datelike, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9 ().\-]{6,20}$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowIssue {
    pub field: String,
    pub message: String,
}

impl RowIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Normalized patient data for one parseable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientDraft {
    pub last_name: String,
    pub first_name: String,
    pub date_of_birth: NaiveDate,
    pub sex: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub file_number: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Outcome for one input row. Rows with errors are never written; rows
/// with only warnings are imported but flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSample {
    pub row: usize,
    pub raw: String,
    pub status: RowStatus,
    pub data: Option<PatientDraft>,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    LastName,
    FirstName,
    DateOfBirth,
    Sex,
    Phone,
    Email,
    FileNumber,
    NationalId,
    Address,
    PostalCode,
    City,
    Country,
}

const REQUIRED_COLUMNS: [(Column, &str); 3] = [
    (Column::LastName, "last_name"),
    (Column::FirstName, "first_name"),
    (Column::DateOfBirth, "date_of_birth"),
];

/// Lowercases, strips accents and collapses punctuation so that
/// "N° Dossier", "numéro de dossier" and "file number" all land on
/// comparable forms.
fn fold_header(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        let mapped = match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        };
        folded.push(mapped);
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn recognize_column(header: &str) -> Option<Column> {
    match fold_header(header).as_str() {
        "name" | "last name" | "lastname" | "nom" | "nom de famille" => Some(Column::LastName),
        "first name" | "firstname" | "prenom" | "given name" => Some(Column::FirstName),
        "date of birth" | "birth date" | "birthdate" | "dob" | "date de naissance"
        | "naissance" => Some(Column::DateOfBirth),
        "sex" | "sexe" | "gender" => Some(Column::Sex),
        "phone" | "phone number" | "telephone" | "tel" | "mobile" | "portable" => {
            Some(Column::Phone)
        }
        "email" | "e mail" | "mail" | "courriel" => Some(Column::Email),
        "file number" | "file no" | "record number" | "numero de dossier" | "n dossier"
        | "dossier" => Some(Column::FileNumber),
        "national id" | "nir" | "ssn" | "numero de securite sociale" | "insee" => {
            Some(Column::NationalId)
        }
        "address" | "adresse" => Some(Column::Address),
        "postal code" | "postcode" | "zip" | "zip code" | "code postal" => {
            Some(Column::PostalCode)
        }
        "city" | "ville" | "town" => Some(Column::City),
        "country" | "pays" => Some(Column::Country),
        _ => None,
    }
}

fn sniff_delimiter(header_line: &str) -> char {
    if header_line.matches(';').count() > header_line.matches(',').count() {
        ';'
    } else {
        ','
    }
}

/// Quote-aware single-line field splitter (doubled quotes escape).
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}

struct CsvLayout {
    delimiter: char,
    columns: HashMap<Column, usize>,
}

impl CsvLayout {
    fn parse(header_line: &str) -> Self {
        let delimiter = sniff_delimiter(header_line);
        let mut columns = HashMap::new();
        for (index, header) in split_line(header_line, delimiter).iter().enumerate() {
            if let Some(column) = recognize_column(header) {
                // First occurrence wins; unrecognized columns are ignored
                columns.entry(column).or_insert(index);
            }
        }
        Self { delimiter, columns }
    }

    fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|(column, _)| !self.columns.contains_key(column))
            .map(|(_, name)| *name)
            .collect()
    }

    fn get<'a>(&self, fields: &'a [String], column: Column) -> Option<&'a str> {
        self.columns
            .get(&column)
            .and_then(|&index| fields.get(index))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Parses a birth date, day-first for the slash/dash/dot formats common in
/// exported charts. Returns an ambiguity note when the day and month could
/// plausibly be swapped.
fn parse_birth_date(raw: &str) -> Result<(NaiveDate, Option<String>), String> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok((date, None));
    }

    for format in ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            let note = (date.day() <= 12 && date.day() != date.month())
                .then(|| format!("'{raw}' is day/month ambiguous, interpreted day-first"));
            return Ok((date, note));
        }
    }

    Err(format!("unrecognized date '{raw}'"))
}

fn normalize_sex(raw: &str) -> Result<String, ()> {
    match fold_header(raw).as_str() {
        "m" | "male" | "h" | "homme" | "masculin" => Ok("M".to_string()),
        "f" | "female" | "femme" | "feminin" | "w" => Ok("F".to_string()),
        _ => Err(()),
    }
}

fn validate_row(layout: &CsvLayout, row: usize, raw_line: &str) -> ValidationSample {
    let fields = split_line(raw_line, layout.delimiter);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let last_name = layout.get(&fields, Column::LastName);
    if last_name.is_none() {
        errors.push(RowIssue::new("last_name", "required field is missing"));
    }
    let first_name = layout.get(&fields, Column::FirstName);
    if first_name.is_none() {
        errors.push(RowIssue::new("first_name", "required field is missing"));
    }

    let date_of_birth = match layout.get(&fields, Column::DateOfBirth) {
        None => {
            errors.push(RowIssue::new("date_of_birth", "required field is missing"));
            None
        }
        Some(raw) => match parse_birth_date(raw) {
            Ok((date, ambiguity)) => {
                if let Some(note) = ambiguity {
                    warnings.push(RowIssue::new("date_of_birth", note));
                }
                if date > Utc::now().date_naive() {
                    errors.push(RowIssue::new("date_of_birth", "date of birth is in the future"));
                    None
                } else {
                    Some(date)
                }
            }
            Err(message) => {
                errors.push(RowIssue::new("date_of_birth", message));
                None
            }
        },
    };

    let sex = layout.get(&fields, Column::Sex).and_then(|raw| {
        normalize_sex(raw)
            .map_err(|_| warnings.push(RowIssue::new("sex", format!("unrecognized sex '{raw}'"))))
            .ok()
    });

    let email = layout.get(&fields, Column::Email).map(str::to_string);
    if let Some(value) = &email {
        if !EMAIL_RE.is_match(value) {
            warnings.push(RowIssue::new("email", format!("'{value}' does not look like an email address")));
        }
    }

    let phone = layout.get(&fields, Column::Phone).map(str::to_string);
    if let Some(value) = &phone {
        if !PHONE_RE.is_match(value) {
            warnings.push(RowIssue::new("phone", format!("'{value}' does not look like a phone number")));
        }
    }

    let data = if errors.is_empty() {
        Some(PatientDraft {
            last_name: last_name.unwrap_or_default().to_string(),
            first_name: first_name.unwrap_or_default().to_string(),
            date_of_birth: date_of_birth.unwrap_or_default(),
            sex,
            phone,
            email,
            file_number: layout.get(&fields, Column::FileNumber).map(str::to_string),
            national_id: layout.get(&fields, Column::NationalId).map(str::to_string),
            address: layout.get(&fields, Column::Address).map(str::to_string),
            postal_code: layout.get(&fields, Column::PostalCode).map(str::to_string),
            city: layout.get(&fields, Column::City).map(str::to_string),
            country: layout.get(&fields, Column::Country).map(str::to_string),
        })
    } else {
        None
    };

    let status = if !errors.is_empty() {
        RowStatus::Error
    } else if !warnings.is_empty() {
        RowStatus::Warning
    } else {
        RowStatus::Ok
    };

    ValidationSample {
        row,
        raw: raw_line.to_string(),
        status,
        data,
        errors,
        warnings,
    }
}

/// Validates a whole upload. `Err` means the file could not be read at all
/// (hard failure); per-row problems come back inside the samples.
pub fn validate_content(content: &str) -> Result<Vec<ValidationSample>, String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines();

    let header_line = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| "file is empty or has no header row".to_string())?;

    let layout = CsvLayout::parse(header_line);
    let missing = layout.missing_required();

    let mut samples = Vec::new();
    let mut row = 0usize;
    for raw_line in lines {
        if raw_line.trim().is_empty() {
            continue;
        }
        row += 1;

        if missing.is_empty() {
            samples.push(validate_row(&layout, row, raw_line));
        } else {
            // Required columns absent from the header: every row fails the
            // same way, but each still gets its own sample for the report
            samples.push(ValidationSample {
                row,
                raw: raw_line.to_string(),
                status: RowStatus::Error,
                data: None,
                errors: missing
                    .iter()
                    .map(|name| RowIssue::new(name, "required column missing from header"))
                    .collect(),
                warnings: Vec::new(),
            });
        }
    }

    if samples.is_empty() {
        return Err("file contains no data rows".to_string());
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Nom,Prénom,Date de naissance,Sexe,Téléphone,Email,N° Dossier";

    fn validate(content: &str) -> Vec<ValidationSample> {
        validate_content(content).expect("content should be readable")
    }

    #[test]
    fn test_recognizes_french_and_english_headers() {
        assert_eq!(recognize_column("Nom"), Some(Column::LastName));
        assert_eq!(recognize_column("last_name"), Some(Column::LastName));
        assert_eq!(recognize_column("Prénom"), Some(Column::FirstName));
        assert_eq!(recognize_column("Date de naissance"), Some(Column::DateOfBirth));
        assert_eq!(recognize_column("DOB"), Some(Column::DateOfBirth));
        assert_eq!(recognize_column("N° Dossier"), Some(Column::FileNumber));
        assert_eq!(recognize_column("Code Postal"), Some(Column::PostalCode));
        assert_eq!(recognize_column("implant diameter"), None);
    }

    #[test]
    fn test_sniffs_semicolon_delimiter() {
        let samples = validate("Nom;Prénom;Date de naissance\nDupont;Alice;1985-04-12\n");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].status, RowStatus::Ok);
        assert_eq!(samples[0].data.as_ref().unwrap().last_name, "Dupont");
    }

    #[test]
    fn test_quoted_field_with_embedded_separator() {
        let content = format!("{HEADER}\n\"Dupont, veuve Martin\",Alice,1985-04-12,F,,,\n");
        let samples = validate(&content);
        assert_eq!(
            samples[0].data.as_ref().unwrap().last_name,
            "Dupont, veuve Martin"
        );
        assert_eq!(samples[0].status, RowStatus::Ok);
    }

    #[test]
    fn test_doubled_quotes_unescape() {
        let content = format!("{HEADER}\n\"Le \"\"Grand\"\" Dupont\",Alice,1985-04-12,,,,\n");
        let samples = validate(&content);
        assert_eq!(
            samples[0].data.as_ref().unwrap().last_name,
            "Le \"Grand\" Dupont"
        );
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let content = format!("{HEADER}\nDupont,,1985-04-12,,,,\n");
        let samples = validate(&content);
        assert_eq!(samples[0].status, RowStatus::Error);
        assert_eq!(samples[0].errors[0].field, "first_name");
        assert!(samples[0].data.is_none());
    }

    #[test]
    fn test_missing_required_header_fails_every_row() {
        let samples = validate("Nom,Sexe\nDupont,F\nMartin,M\n");
        assert_eq!(samples.len(), 2);
        for sample in &samples {
            assert_eq!(sample.status, RowStatus::Error);
            let fields: Vec<&str> = sample.errors.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["first_name", "date_of_birth"]);
        }
    }

    #[test]
    fn test_empty_file_is_hard_failure() {
        assert!(validate_content("").is_err());
        assert!(validate_content("\n\n").is_err());
        // Header only, no data rows
        assert!(validate_content(HEADER).is_err());
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(
            parse_birth_date("1985-04-12").unwrap(),
            (NaiveDate::from_ymd_opt(1985, 4, 12).unwrap(), None)
        );
        let (date, note) = parse_birth_date("25/04/1985").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1985, 4, 25).unwrap());
        // Day 25 cannot be a month, no ambiguity
        assert!(note.is_none());
        assert!(parse_birth_date("12 avril 1985").is_err());
    }

    #[test]
    fn test_ambiguous_date_warns_but_parses_day_first() {
        let content = format!("{HEADER}\nDupont,Alice,03/04/1985,,,,\n");
        let samples = validate(&content);
        assert_eq!(samples[0].status, RowStatus::Warning);
        assert_eq!(
            samples[0].data.as_ref().unwrap().date_of_birth,
            NaiveDate::from_ymd_opt(1985, 4, 3).unwrap()
        );
        assert_eq!(samples[0].warnings[0].field, "date_of_birth");
    }

    #[test]
    fn test_future_birth_date_is_error() {
        let content = format!("{HEADER}\nDupont,Alice,2090-01-01,,,,\n");
        let samples = validate(&content);
        assert_eq!(samples[0].status, RowStatus::Error);
    }

    #[test]
    fn test_soft_issues_warn_but_keep_data() {
        let content = format!("{HEADER}\nDupont,Alice,1985-04-12,X,not-a-phone,broken-email,D-001\n");
        let samples = validate(&content);
        let sample = &samples[0];
        assert_eq!(sample.status, RowStatus::Warning);
        let fields: Vec<&str> = sample.warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec!["sex", "email", "phone"]);
        let data = sample.data.as_ref().unwrap();
        assert_eq!(data.sex, None);
        assert_eq!(data.file_number.as_deref(), Some("D-001"));
    }

    #[test]
    fn test_sex_normalization() {
        assert_eq!(normalize_sex("Homme"), Ok("M".to_string()));
        assert_eq!(normalize_sex("f"), Ok("F".to_string()));
        assert_eq!(normalize_sex("Féminin"), Ok("F".to_string()));
        assert!(normalize_sex("autre").is_err());
    }

    #[test]
    fn test_unrecognized_columns_are_ignored() {
        let content = "Nom,Prénom,Date de naissance,Marque implant\nDupont,Alice,1985-04-12,Straumann\n";
        let samples = validate(content);
        assert_eq!(samples[0].status, RowStatus::Ok);
    }

    #[test]
    fn test_ten_row_breakdown_with_two_missing_birth_dates() {
        let mut content = String::from("Nom,Prénom,Date de naissance\n");
        for i in 0..8 {
            content.push_str(&format!("Patient{i},Test,1980-01-0{}\n", i + 1));
        }
        content.push_str("SansDate,Un,\nSansDate,Deux,\n");

        let samples = validate(&content);
        assert_eq!(samples.len(), 10);
        let errors = samples.iter().filter(|s| s.status == RowStatus::Error).count();
        let ok = samples.iter().filter(|s| s.status == RowStatus::Ok).count();
        let warnings = samples.iter().filter(|s| s.status == RowStatus::Warning).count();
        assert_eq!((ok, warnings, errors), (8, 0, 2));
    }

    #[test]
    fn test_bom_is_stripped() {
        let content = format!("\u{feff}{HEADER}\nDupont,Alice,1985-04-12,,,,\n");
        let samples = validate(&content);
        assert_eq!(samples[0].status, RowStatus::Ok);
    }
}
