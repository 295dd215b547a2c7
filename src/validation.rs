//! Field validation for incoming leads.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::LeadError;
use crate::models::{NewLead, NewLeadRequest};

pub const MIN_AGE: i32 = 17;
pub const MAX_AGE: i32 = 100;

// RFC 5322 simplified: local@domain.tld
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,32}$").expect("identifier regex is valid"));

/// Validate email address format.
pub fn is_valid_email(email: &str) -> bool {
    email.len() >= 5 && EMAIL_REGEX.is_match(email)
}

/// Parses `raw` in `region` and returns it in E.164 form (`+6281234567890`).
pub fn normalize_phone(raw: &str, region: CountryId) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return Err("phone too short".to_string());
    }

    match phonenumber::parse(Some(region), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Normalized phone {} -> {}", raw, formatted);
            Ok(formatted)
        }
        Ok(_) => Err(format!("'{}' is not a valid phone number", raw)),
        Err(e) => Err(format!("cannot parse phone '{}': {:?}", raw, e)),
    }
}

fn identifier(field: &str, value: &str) -> Result<String, LeadError> {
    let value = value.trim();
    if !IDENTIFIER_REGEX.is_match(value) {
        return Err(LeadError::Validation(format!(
            "{} must be 1-32 alphanumeric characters",
            field
        )));
    }
    Ok(value.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Checks and normalises an intake request into a [`NewLead`].
pub fn validate_new_lead(
    request: NewLeadRequest,
    region: CountryId,
) -> Result<NewLead, LeadError> {
    let cif = identifier("cif", &request.cif)?;
    let account_number = identifier("account_number", &request.account_number)?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(LeadError::Validation("name is required".to_string()));
    }

    if !(MIN_AGE..=MAX_AGE).contains(&request.age) {
        return Err(LeadError::Validation(format!(
            "age must be between {} and {}",
            MIN_AGE, MAX_AGE
        )));
    }

    if request.monthly_income < 0 {
        return Err(LeadError::Validation(
            "monthly_income cannot be negative".to_string(),
        ));
    }

    let email = match optional_text(request.email) {
        Some(email) => {
            let email = email.to_ascii_lowercase();
            if !is_valid_email(&email) {
                return Err(LeadError::Validation(format!(
                    "'{}' is not a valid email",
                    email
                )));
            }
            Some(email)
        }
        None => None,
    };

    let phone = optional_text(request.phone)
        .map(|raw| normalize_phone(&raw, region))
        .transpose()
        .map_err(LeadError::Validation)?;

    let mut existing_products: Vec<String> = request
        .existing_products
        .into_iter()
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    existing_products.sort();
    existing_products.dedup();

    Ok(NewLead {
        cif,
        account_number,
        name,
        company_name: optional_text(request.company_name),
        phone,
        email,
        age: request.age,
        monthly_income: request.monthly_income,
        payroll: request.payroll,
        gender: optional_text(request.gender),
        married: request.married,
        segment: optional_text(request.segment),
        job: optional_text(request.job),
        address: optional_text(request.address),
        existing_products,
        transaction_activity: request.transaction_activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewLeadRequest {
        NewLeadRequest {
            cif: "CIF0001".to_string(),
            account_number: "7001234567".to_string(),
            name: " Siti Rahma ".to_string(),
            company_name: None,
            phone: None,
            email: Some("Siti.Rahma@Example.co.id".to_string()),
            age: 35,
            monthly_income: 12_000_000,
            payroll: true,
            gender: Some("F".to_string()),
            married: Some(true),
            segment: Some("  ".to_string()),
            job: None,
            address: None,
            existing_products: vec!["Tabungan".into(), "tabungan".into(), " ".into()],
            transaction_activity: None,
        }
    }

    #[test]
    fn normalises_fields() {
        let lead = validate_new_lead(request(), CountryId::ID).unwrap();
        assert_eq!(lead.name, "Siti Rahma");
        assert_eq!(lead.email.as_deref(), Some("siti.rahma@example.co.id"));
        assert_eq!(lead.segment, None);
        assert_eq!(lead.existing_products, vec!["tabungan".to_string()]);
    }

    #[test]
    fn rejects_bad_identifiers() {
        let mut req = request();
        req.cif = "CIF-0001".to_string();
        assert!(matches!(
            validate_new_lead(req, CountryId::ID),
            Err(LeadError::Validation(_))
        ));

        let mut req = request();
        req.account_number = "".to_string();
        assert!(validate_new_lead(req, CountryId::ID).is_err());
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let mut req = request();
        req.age = 16;
        assert!(validate_new_lead(req, CountryId::ID).is_err());

        let mut req = request();
        req.age = 101;
        assert!(validate_new_lead(req, CountryId::ID).is_err());

        let mut req = request();
        req.monthly_income = -1;
        assert!(validate_new_lead(req, CountryId::ID).is_err());
    }

    #[test]
    fn email_format() {
        assert!(is_valid_email("marketing@bank.co.id"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("user@localhost"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn phone_garbage_is_rejected() {
        assert!(normalize_phone("123", CountryId::ID).is_err());
        assert!(normalize_phone("not a phone number", CountryId::ID).is_err());
    }
}
