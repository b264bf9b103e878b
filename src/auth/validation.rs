//! Field checks run before the auth service is called. Messages use the
//! same wording clients already match on.

use lazy_static::lazy_static;
use regex::Regex;
use time::{macros::format_description, Date, OffsetDateTime};

use crate::auth::dto::{LoginRequest, RegisterRequest, UpdateProfileRequest};
use crate::auth::repo_types::{ProfileChanges, Role};
use crate::error::ValidationErrors;
use crate::images::services::{validate_image, ImageUpload, ProfileImage};

const NAME_MAX: usize = 255;
const EMAIL_MAX: usize = 255;
const CONTACT_MAX: usize = 20;
const PASSWORD_MIN: usize = 8;

/// A registration that passed every rule.
#[derive(Debug, Clone)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: String,
    pub dob: Date,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn label(field: &str) -> String {
    field.replace('_', " ")
}

/// Trimmed value, treating blank input as missing.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(errors: &mut ValidationErrors, field: &'static str, value: Option<String>) -> Option<String> {
    let value = present(value);
    if value.is_none() {
        errors.add(field, format!("The {} field is required.", label(field)));
    }
    value
}

fn max_len(errors: &mut ValidationErrors, field: &'static str, value: &str, max: usize) -> bool {
    if value.chars().count() > max {
        errors.add(
            field,
            format!(
                "The {} field must not be greater than {} characters.",
                label(field),
                max
            ),
        );
        return false;
    }
    true
}

fn check_email(errors: &mut ValidationErrors, value: String) -> Option<String> {
    let email = value.to_lowercase();
    if !is_valid_email(&email) {
        errors.add("email", "The email field must be a valid email address.");
        return None;
    }
    max_len(errors, "email", &email, EMAIL_MAX).then_some(email)
}

fn check_dob(errors: &mut ValidationErrors, value: &str) -> Option<Date> {
    let Ok(dob) = Date::parse(value, format_description!("[year]-[month]-[day]")) else {
        errors.add("dob", "The dob field must be a valid date.");
        return None;
    };
    if dob >= OffsetDateTime::now_utc().date() {
        errors.add("dob", "The dob field must be a date before today.");
        return None;
    }
    Some(dob)
}

fn check_role(errors: &mut ValidationErrors, value: Option<String>) -> Role {
    match present(value).as_deref() {
        None | Some("user") => Role::User,
        Some("admin") => Role::Admin,
        Some(_) => {
            errors.add("role", "The selected role is invalid.");
            Role::User
        }
    }
}

fn check_image(errors: &mut ValidationErrors, image: Option<ImageUpload>) -> Option<ProfileImage> {
    image.and_then(|upload| validate_image(upload, errors))
}

pub fn validate_registration(
    req: RegisterRequest,
    image: Option<ImageUpload>,
) -> Result<(Registration, Option<ProfileImage>), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let first_name = require(&mut errors, "first_name", req.first_name)
        .filter(|v| max_len(&mut errors, "first_name", v, NAME_MAX));
    let last_name = require(&mut errors, "last_name", req.last_name)
        .filter(|v| max_len(&mut errors, "last_name", v, NAME_MAX));
    let email = require(&mut errors, "email", req.email).and_then(|v| check_email(&mut errors, v));
    let contact_number = require(&mut errors, "contact_number", req.contact_number)
        .filter(|v| max_len(&mut errors, "contact_number", v, CONTACT_MAX));
    let dob = require(&mut errors, "dob", req.dob).and_then(|v| check_dob(&mut errors, &v));

    // passwords are taken verbatim, whitespace included
    let password = match req.password.filter(|p| !p.is_empty()) {
        None => {
            errors.add("password", "The password field is required.");
            None
        }
        Some(p) if p.chars().count() < PASSWORD_MIN => {
            errors.add(
                "password",
                format!("The password field must be at least {PASSWORD_MIN} characters."),
            );
            None
        }
        Some(p) if req.password_confirmation.as_deref() != Some(p.as_str()) => {
            errors.add("password", "The password field confirmation does not match.");
            None
        }
        Some(p) => Some(p),
    };
    let role = check_role(&mut errors, req.role);
    let image = check_image(&mut errors, image);

    match (first_name, last_name, email, contact_number, dob, password) {
        (Some(first_name), Some(last_name), Some(email), Some(contact_number), Some(dob), Some(password))
            if errors.is_empty() =>
        {
            Ok((
                Registration {
                    first_name,
                    last_name,
                    email,
                    contact_number,
                    dob,
                    password,
                    role,
                },
                image,
            ))
        }
        _ => Err(errors),
    }
}

pub fn validate_login(req: LoginRequest) -> Result<Credentials, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let email = require(&mut errors, "email", req.email).and_then(|v| check_email(&mut errors, v));
    let password = req.password.filter(|p| !p.is_empty());
    if password.is_none() {
        errors.add("password", "The password field is required.");
    }
    match (email, password) {
        (Some(email), Some(password)) if errors.is_empty() => Ok(Credentials { email, password }),
        _ => Err(errors),
    }
}

/// Like registration, but only the fields that were sent are checked.
pub fn validate_profile_update(
    req: UpdateProfileRequest,
    image: Option<ImageUpload>,
) -> Result<(ProfileChanges, Option<ProfileImage>), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let mut sometimes = |field: &'static str, value: Option<String>| -> Option<String> {
        value.and_then(|v| require(&mut errors, field, Some(v)))
    };
    let first_name = sometimes("first_name", req.first_name);
    let last_name = sometimes("last_name", req.last_name);
    let email = sometimes("email", req.email);
    let contact_number = sometimes("contact_number", req.contact_number);
    let dob = sometimes("dob", req.dob);

    let changes = ProfileChanges {
        first_name: first_name.filter(|v| max_len(&mut errors, "first_name", v, NAME_MAX)),
        last_name: last_name.filter(|v| max_len(&mut errors, "last_name", v, NAME_MAX)),
        email: email.and_then(|v| check_email(&mut errors, v)),
        contact_number: contact_number
            .filter(|v| max_len(&mut errors, "contact_number", v, CONTACT_MAX)),
        dob: dob.and_then(|v| check_dob(&mut errors, &v)),
        profile_image: None,
    };
    let image = check_image(&mut errors, image);

    errors.into_result()?;
    Ok((changes, image))
}
