use std::collections::BTreeSet;

use uuid::Uuid;

use crate::db::queries::{NewProblemInput, UpdateProblemInput};
use crate::error::{AppError, AppResult, FieldError};

pub const CATEGORIES: [&str; 8] = [
    "Education",
    "Technology",
    "Health",
    "Environment",
    "Food & Agriculture",
    "Transportation",
    "Finance",
    "Social",
];

pub const STATUSES: [&str; 5] = ["open", "active", "has_solutions", "solved", "archived"];

const TITLE_MIN: usize = 10;
const TITLE_MAX: usize = 200;
const DESCRIPTION_MIN: usize = 50;
const DESCRIPTION_MAX: usize = 5000;
const LIST_MAX: usize = 5;
const COMMENT_MAX: usize = 2000;
const REPLY_MAX: usize = 1000;

pub fn validate_new_problem(input: &NewProblemInput) -> AppResult<()> {
    let mut errors = Vec::new();
    check_title(&input.title, &mut errors);
    check_description(&input.description, &mut errors);
    check_category(&input.category, &mut errors);
    check_tags(&input.tags, &mut errors);
    check_list("impacts", "impact", &input.impacts, &mut errors);
    check_list("challenges", "challenge", &input.challenges, &mut errors);
    finish(errors)
}

pub fn validate_problem_update(input: &UpdateProblemInput) -> AppResult<()> {
    if input.is_empty() {
        return Err(AppError::BadRequest(
            "at least one field must be provided".to_string(),
        ));
    }

    let mut errors = Vec::new();
    if let Some(title) = &input.title {
        check_title(title, &mut errors);
    }
    if let Some(description) = &input.description {
        check_description(description, &mut errors);
    }
    if let Some(category) = &input.category {
        check_category(category, &mut errors);
    }
    if let Some(tags) = &input.tags {
        check_tags(tags, &mut errors);
    }
    if let Some(impacts) = &input.impacts {
        check_list("impacts", "impact", impacts, &mut errors);
    }
    if let Some(challenges) = &input.challenges {
        check_list("challenges", "challenge", challenges, &mut errors);
    }
    if let Some(status) = &input.status {
        if !STATUSES.contains(&status.as_str()) {
            errors.push(FieldError::new(
                "status",
                format!("Invalid status '{status}'"),
            ));
        }
    }
    finish(errors)
}

pub fn validate_comment_text(text: &str) -> AppResult<()> {
    finish(check_text(text, "Comment", COMMENT_MAX))
}

pub fn validate_reply_text(text: &str) -> AppResult<()> {
    finish(check_text(text, "Reply", REPLY_MAX))
}

/// Accepts only canonical hyphenated UUIDs, in either case.
pub fn parse_id(value: &str, entity: &str) -> AppResult<Uuid> {
    let invalid = || AppError::BadRequest(format!("Invalid {entity} id"));
    let parsed = Uuid::parse_str(value).map_err(|_| invalid())?;
    if !value.eq_ignore_ascii_case(&parsed.hyphenated().to_string()) {
        return Err(invalid());
    }
    Ok(parsed)
}

fn check_title(title: &str, errors: &mut Vec<FieldError>) {
    let length = title.chars().count();
    if length < TITLE_MIN {
        errors.push(FieldError::new(
            "title",
            format!("Title must be at least {TITLE_MIN} characters"),
        ));
    } else if length > TITLE_MAX {
        errors.push(FieldError::new(
            "title",
            format!("Title must not exceed {TITLE_MAX} characters"),
        ));
    }
}

fn check_description(description: &str, errors: &mut Vec<FieldError>) {
    let length = description.chars().count();
    if length < DESCRIPTION_MIN {
        errors.push(FieldError::new(
            "description",
            format!("Description must be at least {DESCRIPTION_MIN} characters"),
        ));
    } else if length > DESCRIPTION_MAX {
        errors.push(FieldError::new(
            "description",
            format!("Description must not exceed {DESCRIPTION_MAX} characters"),
        ));
    }
}

fn check_category(category: &str, errors: &mut Vec<FieldError>) {
    if category.trim().is_empty() {
        errors.push(FieldError::new("category", "Category is required"));
    } else if !CATEGORIES.contains(&category) {
        errors.push(FieldError::new("category", "Invalid category"));
    }
}

fn check_tags(tags: &[String], errors: &mut Vec<FieldError>) {
    let before = errors.len();
    check_list("tags", "tag", tags, errors);
    if errors.len() == before {
        let unique: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        if unique.len() != tags.len() {
            errors.push(FieldError::new("tags", "Tags must be unique"));
        }
    }
}

fn check_list(field: &str, noun: &str, items: &[String], errors: &mut Vec<FieldError>) {
    if items.is_empty() {
        errors.push(FieldError::new(
            field,
            format!("At least one {noun} is required"),
        ));
    } else if items.len() > LIST_MAX {
        errors.push(FieldError::new(
            field,
            format!("Maximum {LIST_MAX} {field} allowed"),
        ));
    } else if items.iter().any(|item| item.trim().is_empty()) {
        errors.push(FieldError::new(field, format!("Empty {noun} is not allowed")));
    }
}

fn check_text(text: &str, label: &str, max: usize) -> Vec<FieldError> {
    let length = text.trim().chars().count();
    if length == 0 {
        vec![FieldError::new("text", format!("{label} cannot be empty"))]
    } else if length > max {
        vec![FieldError::new(
            "text",
            format!("{label} must not exceed {max} characters"),
        )]
    } else {
        Vec::new()
    }
}

fn finish(errors: Vec<FieldError>) -> AppResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> NewProblemInput {
        NewProblemInput {
            user_id: Uuid::new_v4().to_string(),
            title: "Rural schools lack internet".to_string(),
            description: "Many rural schools have no reliable connectivity, which blocks online learning.".to_string(),
            category: "Education".to_string(),
            tags: vec!["internet".to_string(), "schools".to_string()],
            impacts: vec!["students fall behind".to_string()],
            challenges: vec!["infrastructure cost".to_string()],
        }
    }

    fn fields(result: AppResult<()>) -> Vec<String> {
        match result {
            Err(AppError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_problem_passes() {
        assert!(validate_new_problem(&draft()).is_ok());
    }

    #[test]
    fn nine_character_title_names_title_field() {
        let mut input = draft();
        input.title = "123456789".to_string();
        assert_eq!(fields(validate_new_problem(&input)), vec!["title"]);
    }

    #[test]
    fn every_failing_field_is_reported() {
        let input = NewProblemInput {
            user_id: Uuid::new_v4().to_string(),
            title: String::new(),
            description: "short".to_string(),
            category: "Space".to_string(),
            tags: vec!["a".to_string(), "a".to_string()],
            impacts: Vec::new(),
            challenges: (0..6).map(|i| i.to_string()).collect(),
        };
        assert_eq!(
            fields(validate_new_problem(&input)),
            vec![
                "title",
                "description",
                "category",
                "tags",
                "impacts",
                "challenges"
            ]
        );
    }

    #[test]
    fn update_requires_a_field_and_checks_status() {
        assert!(matches!(
            validate_problem_update(&UpdateProblemInput::default()),
            Err(AppError::BadRequest(_))
        ));

        let update = UpdateProblemInput {
            status: Some("closed".to_string()),
            ..UpdateProblemInput::default()
        };
        assert_eq!(fields(validate_problem_update(&update)), vec!["status"]);

        let update = UpdateProblemInput {
            status: Some("solved".to_string()),
            ..UpdateProblemInput::default()
        };
        assert!(validate_problem_update(&update).is_ok());
    }

    #[test]
    fn comment_and_reply_limits_differ() {
        let long = "x".repeat(1500);
        assert!(validate_comment_text(&long).is_ok());
        assert_eq!(fields(validate_reply_text(&long)), vec!["text"]);
        assert_eq!(fields(validate_comment_text("   ")), vec!["text"]);
    }

    #[test]
    fn parse_id_rejects_non_canonical_values() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "problem").unwrap(), id);
        assert_eq!(
            parse_id(&id.to_string().to_uppercase(), "problem").unwrap(),
            id
        );
        assert!(parse_id(&id.simple().to_string(), "problem").is_err());
        assert!(parse_id("not-a-uuid", "problem").is_err());
    }
}
