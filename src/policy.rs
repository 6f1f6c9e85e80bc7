use ulid::Ulid;

use crate::auth::{Role, Subject};

/// What a request touches.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// Bookable slots of any staff member.
    Availability,
    /// Staff records and the service menu.
    Catalog,
    Schedule { staff_id: Ulid },
    Appointment { staff_id: Ulid, client_id: &'a str },
    /// Every appointment of one staff member.
    StaffAppointments { staff_id: Ulid },
    /// Live change feed of one staff member.
    StaffEvents { staff_id: Ulid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    /// Cancelling an appointment, the one status change clients may make.
    Cancel,
}

/// The single authorization decision point.
pub fn authorize(subject: &Subject, resource: Resource<'_>, action: Action) -> bool {
    if subject.role == Role::Admin {
        return true;
    }
    match resource {
        Resource::Availability | Resource::Catalog => action == Action::Read,
        Resource::Schedule { staff_id } => {
            action == Action::Read || subject.is_staff_member(staff_id)
        }
        Resource::Appointment {
            staff_id,
            client_id,
        } => match subject.role {
            Role::Client => {
                subject.id == client_id
                    && matches!(action, Action::Read | Action::Create | Action::Cancel)
            }
            Role::Staff => subject.is_staff_member(staff_id),
            Role::Admin => true,
        },
        Resource::StaffAppointments { staff_id } | Resource::StaffEvents { staff_id } => {
            action == Action::Read && subject.is_staff_member(staff_id)
        }
    }
}
