use crate::access::Role;
use crate::error::AppError;

pub const GRADES: [&str; 4] = ["9th", "10th", "11th", "12th"];

fn readable(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn invalid(field: &str, rule: impl std::fmt::Display) -> AppError {
    AppError::Validation(format!("{} {}", readable(field), rule))
}

pub fn score(score: f64, max_score: f64) -> Result<(), AppError> {
    if !score.is_finite() {
        return Err(invalid("score", "must be a valid number"));
    }
    if !max_score.is_finite() || max_score <= 0.0 {
        return Err(invalid("max_score", "must be greater than 0"));
    }
    if score < 0.0 {
        return Err(invalid("score", "must be at least 0"));
    }
    if score > max_score {
        return Err(invalid("score", format_args!("must be at most {max_score}")));
    }
    Ok(())
}

pub fn grade(grade: &str) -> Result<(), AppError> {
    if GRADES.contains(&grade) {
        Ok(())
    } else {
        Err(invalid("grade", "format is invalid"))
    }
}

/// Students carry one of the known grades; staff carry none.
pub fn profile_grade(role: Role, grade: Option<&str>) -> Result<(), AppError> {
    match (role, grade) {
        (Role::Student, Some(value)) => self::grade(value),
        (Role::Student, None) => Err(invalid("grade", "is required")),
        (_, Some(_)) => Err(AppError::Validation("Only students have a grade".to_string())),
        (_, None) => Ok(()),
    }
}

fn length(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(invalid(field, "is required"));
    }
    if len < min {
        return Err(invalid(
            field,
            format_args!("must be at least {min} characters long"),
        ));
    }
    if len > max {
        return Err(invalid(
            field,
            format_args!("must be at most {max} characters long"),
        ));
    }
    Ok(())
}

pub fn subject(value: &str) -> Result<(), AppError> {
    length("subject", value, 2, 50)
}

/// Subject of a new progress record: the given one, else the classroom's.
pub fn progress_subject(
    given: Option<&str>,
    classroom_subject: Option<&str>,
) -> Result<String, AppError> {
    let chosen = given
        .filter(|s| !s.trim().is_empty())
        .or(classroom_subject)
        .ok_or_else(|| invalid("subject", "is required"))?;
    subject(chosen)?;
    Ok(chosen.trim().to_string())
}

pub fn full_name(value: &str) -> Result<(), AppError> {
    length("full_name", value, 2, 100)
}

pub fn school_name(value: &str) -> Result<(), AppError> {
    length("school_name", value, 2, 200)
}

pub fn classroom_name(value: &str) -> Result<(), AppError> {
    length("name", value, 1, 200)
}

pub fn email(value: &str) -> Result<(), AppError> {
    let valid = !value.chars().any(char::is_whitespace)
        && match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain
                        .split_once('.')
                        .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
            }
            None => false,
        };

    if valid {
        Ok(())
    } else {
        Err(invalid("email", "must be a valid email address"))
    }
}
