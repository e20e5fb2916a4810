use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Classroom, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    HeadTeacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::HeadTeacher => "head_teacher",
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Role::Teacher | Role::HeadTeacher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "head_teacher" => Ok(Role::HeadTeacher),
            other => Err(AppError::Validation(format!("Unknown role '{other}'"))),
        }
    }
}

/// Which progress rows an actor is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressScope {
    Student(Uuid),
    Teacher(Uuid),
    School(Uuid),
    Nothing,
}

pub fn progress_scope(profile: &Profile) -> ProgressScope {
    match (profile.role, profile.school_id) {
        (Role::Student, _) => ProgressScope::Student(profile.id),
        (Role::Teacher, _) => ProgressScope::Teacher(profile.id),
        (Role::HeadTeacher, Some(school_id)) => ProgressScope::School(school_id),
        (Role::HeadTeacher, None) => ProgressScope::Nothing,
    }
}

/// Classroom listing follows progress visibility, except students see none.
pub fn classroom_scope(profile: &Profile) -> ProgressScope {
    match progress_scope(profile) {
        ProgressScope::Student(_) => ProgressScope::Nothing,
        scope => scope,
    }
}

pub fn ensure_can_write(profile: &Profile) -> Result<(), AppError> {
    if profile.role.can_write() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} is a {} and cannot modify records",
            profile.email, profile.role
        )))
    }
}

/// Teachers write to classrooms they teach, head teachers to any classroom in
/// their school.
pub fn ensure_can_write_classroom(
    profile: &Profile,
    classroom: &Classroom,
) -> Result<(), AppError> {
    ensure_can_write(profile)?;
    let allowed = match profile.role {
        Role::Teacher => classroom.teacher_id == profile.id,
        Role::HeadTeacher => profile.school_id == Some(classroom.school_id),
        Role::Student => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} cannot modify records in classroom {}",
            profile.email, classroom.name
        )))
    }
}

/// Write check for an existing progress row. Rows whose classroom was deleted
/// belong to no teacher, so only a head teacher of the row's school may touch
/// them.
pub fn ensure_can_write_progress(
    profile: &Profile,
    classroom: Option<&Classroom>,
    school_id: Uuid,
) -> Result<(), AppError> {
    if let Some(classroom) = classroom {
        return ensure_can_write_classroom(profile, classroom);
    }

    ensure_can_write(profile)?;
    if profile.role == Role::HeadTeacher && profile.school_id == Some(school_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} cannot modify progress records without a classroom in school {}",
            profile.email, school_id
        )))
    }
}

/// Progress can only be recorded for students of the classroom's school.
pub fn ensure_enrolled(student: &Profile, classroom: &Classroom) -> Result<(), AppError> {
    if student.role != Role::Student {
        return Err(AppError::Validation(format!(
            "{} is not a student",
            student.email
        )));
    }
    if student.school_id != Some(classroom.school_id) {
        return Err(AppError::Validation(format!(
            "{} is not enrolled at the school of {}",
            student.email, classroom.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: Role, school_id: Option<Uuid>) -> Profile {
        Profile {
            id: Uuid::from_u128(7),
            full_name: "Morgan Hale".to_string(),
            email: "morgan.hale@northfield.edu".to_string(),
            role,
            grade: None,
            school_id,
        }
    }

    fn classroom(teacher_id: Uuid, school_id: Uuid) -> Classroom {
        Classroom {
            id: Uuid::from_u128(40),
            name: "Algebra II".to_string(),
            subject: Some("Math".to_string()),
            school_id,
            teacher_id,
        }
    }

    #[test]
    fn roles_parse_and_display() {
        for role in [Role::Student, Role::Teacher, Role::HeadTeacher] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("principal".parse::<Role>().is_err());
    }

    #[test]
    fn scope_follows_role() {
        let school = Uuid::from_u128(1);
        assert_eq!(
            progress_scope(&profile(Role::Student, Some(school))),
            ProgressScope::Student(Uuid::from_u128(7))
        );
        assert_eq!(
            progress_scope(&profile(Role::Teacher, Some(school))),
            ProgressScope::Teacher(Uuid::from_u128(7))
        );
        assert_eq!(
            progress_scope(&profile(Role::HeadTeacher, Some(school))),
            ProgressScope::School(school)
        );
        assert_eq!(
            progress_scope(&profile(Role::HeadTeacher, None)),
            ProgressScope::Nothing
        );
        assert_eq!(
            classroom_scope(&profile(Role::Student, Some(school))),
            ProgressScope::Nothing
        );
    }

    #[test]
    fn students_cannot_write() {
        let err = ensure_can_write(&profile(Role::Student, None)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn teachers_write_only_to_their_classrooms() {
        let school = Uuid::from_u128(1);
        let teacher = profile(Role::Teacher, Some(school));
        assert!(ensure_can_write_classroom(&teacher, &classroom(teacher.id, school)).is_ok());
        assert!(
            ensure_can_write_classroom(&teacher, &classroom(Uuid::from_u128(99), school)).is_err()
        );
    }

    #[test]
    fn head_teachers_write_within_their_school() {
        let school = Uuid::from_u128(1);
        let head = profile(Role::HeadTeacher, Some(school));
        assert!(ensure_can_write_classroom(&head, &classroom(Uuid::from_u128(99), school)).is_ok());
        assert!(ensure_can_write_classroom(
            &head,
            &classroom(Uuid::from_u128(99), Uuid::from_u128(2))
        )
        .is_err());
    }

    #[test]
    fn orphaned_progress_is_writable_only_by_its_head_teacher() {
        let school = Uuid::from_u128(1);
        let head = profile(Role::HeadTeacher, Some(school));
        assert!(ensure_can_write_progress(&head, None, school).is_ok());

        for actor in [
            profile(Role::HeadTeacher, Some(Uuid::from_u128(2))),
            profile(Role::Teacher, Some(school)),
            profile(Role::Student, Some(school)),
        ] {
            let err = ensure_can_write_progress(&actor, None, school).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)), "{}", actor.role);
        }
    }

    #[test]
    fn progress_with_classroom_follows_classroom_rules() {
        let school = Uuid::from_u128(1);
        let teacher = profile(Role::Teacher, Some(school));
        let own = classroom(teacher.id, school);
        let foreign = classroom(Uuid::from_u128(99), school);

        assert!(ensure_can_write_progress(&teacher, Some(&own), school).is_ok());
        assert!(ensure_can_write_progress(&teacher, Some(&foreign), school).is_err());
    }

    #[test]
    fn students_must_be_enrolled_at_the_classroom_school() {
        let school = Uuid::from_u128(1);
        let room = classroom(Uuid::from_u128(99), school);

        assert!(ensure_enrolled(&profile(Role::Student, Some(school)), &room).is_ok());

        let err = ensure_enrolled(&profile(Role::Student, Some(Uuid::from_u128(2))), &room)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "morgan.hale@northfield.edu is not enrolled at the school of Algebra II"
        );

        let err = ensure_enrolled(&profile(Role::Student, None), &room).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = ensure_enrolled(&profile(Role::Teacher, Some(school)), &room).unwrap_err();
        assert_eq!(err.to_string(), "morgan.hale@northfield.edu is not a student");
    }
}
