//! MFA string handling.
//!
//! An MFA names a function as `<Module>(.<Submodule>)*.<name>/<arity>`,
//! e.g. `App.Accounts.get_user/1`. Queries accept MFA strings; a violating
//! string yields an empty result rather than an error.

/// A parsed MFA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mfa {
    pub module: String,
    pub name: String,
    pub arity: usize,
}

impl Mfa {
    pub fn format(&self) -> String {
        format!("{}.{}/{}", self.module, self.name, self.arity)
    }
}

/// Parse an MFA string. Returns `None` when the string does not match the
/// grammar: at least one capitalized module segment, a lowercase function
/// name, and a non-negative decimal arity.
pub fn parse(input: &str) -> Option<Mfa> {
    let (front, arity_str) = input.rsplit_once('/')?;
    let arity: usize = arity_str.parse().ok()?;
    let (module, name) = front.rsplit_once('.')?;
    if module.is_empty() || name.is_empty() {
        return None;
    }
    if !module.split('.').all(is_module_segment) {
        return None;
    }
    if !is_function_name(name) {
        return None;
    }
    Some(Mfa {
        module: module.to_string(),
        name: name.to_string(),
        arity,
    })
}

fn is_module_segment(seg: &str) -> bool {
    let mut chars = seg.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    let mut rest: Vec<char> = chars.collect();
    // Trailing ? or ! is allowed once.
    if matches!(rest.last(), Some('?') | Some('!')) {
        rest.pop();
    }
    rest.iter().all(|c| c.is_ascii_alphanumeric() || *c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_mfas() {
        let mfa = parse("App.Accounts.get_user/1").unwrap();
        assert_eq!(mfa.module, "App.Accounts");
        assert_eq!(mfa.name, "get_user");
        assert_eq!(mfa.arity, 1);
        assert_eq!(mfa.format(), "App.Accounts.get_user/1");

        assert!(parse("App.valid?/0").is_some());
        assert!(parse("A.B.C.run!/3").is_some());
        assert!(parse("Single.f/0").is_some());
    }

    #[test]
    fn rejects_malformed_mfas() {
        for bad in [
            "",
            "App.Accounts",           // no arity
            "App.Accounts/1",         // no function name
            "get_user/1",             // no module
            "App.Accounts.get_user/x", // non-numeric arity
            "App.Accounts.get_user/-1",
            "app.accounts.get_user/1", // lowercase module segment
            "App..get_user/1",
            "App.GetUser/1",          // capitalized function name
        ] {
            assert!(parse(bad).is_none(), "expected rejection: {}", bad);
        }
    }
}
