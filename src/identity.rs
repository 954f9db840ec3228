//! Caller identity: resolution at the host boundary and the ambient act-as
//! identity seen by tool handlers.
//!
//! The ambient identity is task-local. [`confined`] gives a future its own
//! slot and [`ActAs`] switches the slot for as long as the guard lives,
//! restoring the previous value when dropped.

use std::cell::RefCell;
use std::future::Future;

use http::request::Parts;
use serde::Serialize;

/// An authenticated principal known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            authorities: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }
}

/// The host's authentication boundary.
pub trait IdentityResolver: Send + Sync {
    /// The caller of an inbound HTTP exchange, if authenticated.
    fn current_caller(&self, request: &Parts) -> Option<Identity>;

    /// Looks up a user by identifier for act-as elevation.
    fn resolve_user(&self, id: &str) -> Option<Identity>;
}

/// Resolver for hosts without authentication: nobody is ever a caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl IdentityResolver for Anonymous {
    fn current_caller(&self, _request: &Parts) -> Option<Identity> {
        None
    }

    fn resolve_user(&self, _id: &str) -> Option<Identity> {
        None
    }
}

/// Takes the caller from a header set by an authenticating reverse proxy.
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    header: http::HeaderName,
}

impl HeaderIdentityResolver {
    pub fn new(header: http::HeaderName) -> Self {
        Self { header }
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn current_caller(&self, request: &Parts) -> Option<Identity> {
        request
            .headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|id| self.resolve_user(id))
    }

    fn resolve_user(&self, id: &str) -> Option<Identity> {
        (!id.is_empty()).then(|| Identity::new(id))
    }
}

tokio::task_local! {
    static AMBIENT: RefCell<Option<Identity>>;
}

/// The ambient identity of the current task, if any.
pub fn current() -> Option<Identity> {
    AMBIENT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Runs `fut` with an ambient identity slot.
///
/// Reuses the enclosing slot when one exists so nested calls observe and
/// restore the outer identity.
pub async fn confined<F: Future>(fut: F) -> F::Output {
    if AMBIENT.try_with(|_| ()).is_ok() {
        fut.await
    } else {
        AMBIENT.scope(RefCell::new(None), fut).await
    }
}

/// Switches the ambient identity until dropped.
#[must_use = "the identity is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ActAs {
    previous: Option<Option<Identity>>,
}

impl ActAs {
    /// Makes `identity` ambient. `None` leaves the current identity in place.
    ///
    /// Outside a [`confined`] scope this is a no-op.
    pub fn enter(identity: Option<Identity>) -> Self {
        let Some(identity) = identity else {
            return Self { previous: None };
        };
        let previous = AMBIENT
            .try_with(|slot| slot.replace(Some(identity)))
            .ok();
        Self { previous }
    }
}

impl Drop for ActAs {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = AMBIENT.try_with(|slot| *slot.borrow_mut() = previous);
        }
    }
}
