//! Tiered access policy.
//!
//! Pure decision logic shared by documents (units are pages) and video
//! (units are seconds). Nothing here touches the database or the request.

use gatehouse_common::{Error, Result, UpgradeRequired};

/// What is being accessed, reduced to the fields the policy reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub active: bool,
    pub premium: bool,
    /// Free units for premium subjects.
    pub preview_limit: u32,
    /// Units in the whole subject.
    pub total: u32,
}

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Authenticated { entitled: bool },
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Full,
    /// Only units `1..=limit` are visible.
    PreviewOnly(u32),
    Denied,
}

impl Access {
    /// Number of visible units out of `total`, or `None` when denied.
    pub fn visible_units(self, total: u32) -> Option<u32> {
        match self {
            Access::Full => Some(total),
            Access::PreviewOnly(limit) => Some(limit.min(total)),
            Access::Denied => None,
        }
    }

    pub fn is_limited(self) -> bool {
        matches!(self, Access::PreviewOnly(_))
    }
}

/// Decide how much of `subject` the viewer may see.
///
/// Anonymous viewers always take the stricter path, capped by
/// `anonymous_limit`, regardless of the premium flag.
pub fn evaluate(subject: &Subject, viewer: Viewer, anonymous_limit: u32) -> Access {
    if !subject.active {
        return Access::Denied;
    }

    match viewer {
        Viewer::Anonymous => {
            let cap = if subject.premium {
                subject.preview_limit
            } else {
                subject.total
            };
            Access::PreviewOnly(anonymous_limit.min(cap))
        }
        Viewer::Authenticated { .. } if !subject.premium => Access::Full,
        Viewer::Authenticated { entitled: true } => Access::Full,
        Viewer::Authenticated { entitled: false } => Access::PreviewOnly(subject.preview_limit),
    }
}

/// Check a single 1-indexed unit against an access decision.
pub fn authorize_unit(access: Access, unit: u32, total: u32) -> Result<()> {
    let Some(visible) = access.visible_units(total) else {
        return Err(Error::not_found("unit", unit));
    };
    if unit == 0 || unit > total {
        return Err(Error::not_found("unit", unit));
    }
    if unit > visible {
        return Err(Error::AccessDenied(UpgradeRequired::units(visible, total)));
    }
    Ok(())
}
