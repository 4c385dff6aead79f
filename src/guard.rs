//! Navigation guard.
//!
//! Protected routes need a token that is usable right now; guest-only routes
//! (login, register) bounce users who already have one.

use crate::auth::{AuthError, SessionManager};

pub const LOGIN_ROUTE: &str = "/login";
pub const HOME_ROUTE: &str = "/dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    RequiresAuth,
    RequiresGuest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(&'static str),
}

pub fn resolve(access: RouteAccess, token_valid: bool) -> Navigation {
    match access {
        RouteAccess::RequiresAuth if !token_valid => Navigation::Redirect(LOGIN_ROUTE),
        RouteAccess::RequiresGuest if token_valid => Navigation::Redirect(HOME_ROUTE),
        _ => Navigation::Proceed,
    }
}

/// Resolve navigation against the current session
pub fn check(manager: &SessionManager, access: RouteAccess) -> Result<Navigation, AuthError> {
    if access == RouteAccess::Public {
        return Ok(Navigation::Proceed);
    }
    Ok(resolve(access, manager.is_authenticated()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_route_without_token() {
        assert_eq!(
            resolve(RouteAccess::RequiresAuth, false),
            Navigation::Redirect(LOGIN_ROUTE)
        );
        assert_eq!(resolve(RouteAccess::RequiresAuth, true), Navigation::Proceed);
    }

    #[test]
    fn test_guest_route_with_token() {
        assert_eq!(
            resolve(RouteAccess::RequiresGuest, true),
            Navigation::Redirect(HOME_ROUTE)
        );
        assert_eq!(resolve(RouteAccess::RequiresGuest, false), Navigation::Proceed);
    }

    #[test]
    fn test_public_route_always_proceeds() {
        assert_eq!(resolve(RouteAccess::Public, true), Navigation::Proceed);
        assert_eq!(resolve(RouteAccess::Public, false), Navigation::Proceed);
    }
}
