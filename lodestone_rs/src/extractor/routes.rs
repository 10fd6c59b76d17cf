//! Route extraction pass.
//!
//! Walks router modules and folds nested `scope` blocks into concrete
//! routes: verb macros emit one route each, `resources` expands into the
//! default CRUD set, `live` emits a GET route. Path prefixes and alias
//! prefixes accumulate through scope nesting.

use std::path::Path;

use tracing::warn;

use crate::discovery::normalize;
use crate::parser::ast::{Call, Expr};
use crate::parser::parse;
use crate::records::Route;

/// HTTP verb macros recognized inside scope bodies.
const VERBS: &[&str] = &[
    "get", "post", "put", "patch", "delete", "head", "options", "connect", "trace",
];

/// The default CRUD expansion of a `resources` form, in emission order.
/// `update` appears twice, once per verb.
const RESOURCE_ACTIONS: &[(&str, &str, &str)] = &[
    ("GET", "", "index"),
    ("GET", "/:id", "show"),
    ("GET", "/new", "new"),
    ("GET", "/:id/edit", "edit"),
    ("POST", "", "create"),
    ("PUT", "/:id", "update"),
    ("PATCH", "/:id", "update"),
    ("DELETE", "/:id", "delete"),
];

/// Cheap probe: does this source look like a router?
pub fn is_router_source(content: &str) -> bool {
    super::regexes::regex_router_marker().is_match(content)
}

/// Extract routes from the given files. Non-router files and files that
/// fail to parse contribute nothing. The result is globally sorted by
/// (verb, path) and deduplicated on the route unique key.
pub fn extract(root: &Path, files: &[std::path::PathBuf]) -> Vec<Route> {
    let mut routes = Vec::new();
    for path in files {
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        if !is_router_source(&content) {
            continue;
        }
        let tree = match parse(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "router parse failed");
                continue;
            }
        };
        let file = normalize(root, path);
        for expr in &tree {
            collect_modules(expr, None, &file, &mut routes);
        }
    }
    routes.sort_by(|a, b| {
        (&a.verb, &a.path, &a.controller, &a.action).cmp(&(
            &b.verb,
            &b.path,
            &b.controller,
            &b.action,
        ))
    });
    routes.dedup_by(|a, b| {
        a.verb == b.verb && a.path == b.path && a.controller == b.controller && a.action == b.action
    });
    routes
}

/// Find `defmodule` forms (including nested ones) and walk their bodies.
fn collect_modules(expr: &Expr, parent: Option<&str>, file: &str, out: &mut Vec<Route>) {
    let Some(call) = expr.as_call() else { return };
    if call.name != "defmodule" || call.target.is_some() {
        return;
    }
    let Some(name) = call.args.first().and_then(|a| a.alias_name()) else {
        return;
    };
    let module = match parent {
        Some(p) => format!("{}.{}", p, name),
        None => name,
    };
    if let Some(body) = call.do_block() {
        let ctx = Fold {
            path_prefix: String::new(),
            alias_prefix: String::new(),
            router: module.clone(),
            file: file.to_string(),
        };
        for item in body {
            walk(item, &ctx, out);
            collect_modules(item, Some(&module), file, out);
        }
    }
}

/// Folding context carried through nested scopes.
#[derive(Clone)]
struct Fold {
    path_prefix: String,
    alias_prefix: String,
    router: String,
    file: String,
}

fn walk(expr: &Expr, ctx: &Fold, out: &mut Vec<Route>) {
    let Some(call) = expr.as_call() else { return };
    if call.target.is_some() {
        return;
    }
    match call.name.as_str() {
        "scope" => walk_scope(call, ctx, out),
        "resources" => expand_resources(call, ctx, out),
        "live" => {
            if let (Some(Expr::Str(path)), Some(view)) = (call.args.first(), call.args.get(1)) {
                if let Some(view) = view.alias_name() {
                    out.push(Route {
                        verb: "GET".to_string(),
                        path: join_paths(&ctx.path_prefix, path),
                        controller: qualify(&ctx.alias_prefix, &view),
                        action: "live".to_string(),
                        router: ctx.router.clone(),
                        file: ctx.file.clone(),
                        line: call.line,
                    });
                }
            }
        }
        verb if VERBS.contains(&verb) => {
            let (Some(Expr::Str(path)), Some(controller), Some(Expr::Atom(action))) =
                (call.args.first(), call.args.get(1), call.args.get(2))
            else {
                return;
            };
            let Some(controller) = controller.alias_name() else {
                return;
            };
            out.push(Route {
                verb: verb.to_ascii_uppercase(),
                path: join_paths(&ctx.path_prefix, path),
                controller: qualify(&ctx.alias_prefix, &controller),
                action: action.clone(),
                router: ctx.router.clone(),
                file: ctx.file.clone(),
                line: call.line,
            });
        }
        _ => {}
    }
}

/// `scope "/path", AliasPrefix do ... end` and its keyword variants.
fn walk_scope(call: &Call, ctx: &Fold, out: &mut Vec<Route>) {
    let mut path = None;
    let mut alias = None;
    for arg in &call.args {
        match arg {
            Expr::Str(p) if path.is_none() => path = Some(p.clone()),
            Expr::Alias(_) if alias.is_none() => alias = arg.alias_name(),
            Expr::Keyword(pairs) => {
                for (key, value) in pairs {
                    match (key.as_str(), value) {
                        ("path", Expr::Str(p)) => path = Some(p.clone()),
                        ("alias", v) => alias = v.alias_name().or(alias.take()),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    let inner = Fold {
        path_prefix: match &path {
            Some(p) => join_prefix(&ctx.path_prefix, p),
            None => ctx.path_prefix.clone(),
        },
        alias_prefix: match &alias {
            Some(a) => qualify(&ctx.alias_prefix, a),
            None => ctx.alias_prefix.clone(),
        },
        router: ctx.router.clone(),
        file: ctx.file.clone(),
    };
    if let Some(body) = call.do_block() {
        for item in body {
            walk(item, &inner, out);
        }
    }
}

fn expand_resources(call: &Call, ctx: &Fold, out: &mut Vec<Route>) {
    let (Some(Expr::Str(path)), Some(controller)) = (call.args.first(), call.args.get(1)) else {
        return;
    };
    let Some(controller) = controller.alias_name() else {
        return;
    };
    let controller = qualify(&ctx.alias_prefix, &controller);
    let base = join_paths(&ctx.path_prefix, path);

    let only = action_filter(call.keyword("only"));
    let except = action_filter(call.keyword("except"));

    for (verb, suffix, action) in RESOURCE_ACTIONS {
        if let Some(only) = &only {
            if !only.iter().any(|a| a == action) {
                continue;
            }
        }
        if let Some(except) = &except {
            if except.iter().any(|a| a == action) {
                continue;
            }
        }
        out.push(Route {
            verb: (*verb).to_string(),
            path: format!("{}{}", base, suffix),
            controller: controller.clone(),
            action: (*action).to_string(),
            router: ctx.router.clone(),
            file: ctx.file.clone(),
            line: call.line,
        });
    }

    // Nested resources: `resources "/users", UserController do ... end`
    // routes children under `/users/:user_id`.
    if let Some(body) = call.do_block() {
        let resource = path.trim_matches('/');
        let inner = Fold {
            path_prefix: format!("{}/:{}_id", base, singularize(resource)),
            alias_prefix: ctx.alias_prefix.clone(),
            router: ctx.router.clone(),
            file: ctx.file.clone(),
        };
        for item in body {
            walk(item, &inner, out);
        }
    }
}

fn action_filter(value: Option<&Expr>) -> Option<Vec<String>> {
    match value {
        Some(Expr::List(items)) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Expr::Atom(a) => Some(a.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Join a scope prefix with a local path: single slash between segments,
/// no trailing slash unless the result is the root.
fn join_paths(prefix: &str, local: &str) -> String {
    let pre = prefix.trim_end_matches('/');
    let loc = local.trim_matches('/');
    if loc.is_empty() {
        if pre.is_empty() {
            "/".to_string()
        } else {
            pre.to_string()
        }
    } else {
        format!("{}/{}", pre, loc)
    }
}

/// Extend a scope path prefix (kept without trailing slash).
fn join_prefix(prefix: &str, local: &str) -> String {
    let joined = join_paths(prefix, local);
    if joined == "/" {
        String::new()
    } else {
        joined
    }
}

/// Prefix a controller with the folded scope alias unless it is already
/// fully qualified under that prefix.
fn qualify(alias_prefix: &str, controller: &str) -> String {
    if alias_prefix.is_empty() {
        return controller.to_string();
    }
    if controller == alias_prefix || controller.starts_with(&format!("{}.", alias_prefix)) {
        return controller.to_string();
    }
    format!("{}.{}", alias_prefix, controller)
}

/// Purely syntactic singularization: `ies` -> `y`, else strip `es`, else
/// strip `s`, else identity.
fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = word.strip_suffix("es") {
        stem.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn routes_from(src: &str) -> Vec<Route> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        let full = format!("defmodule AppWeb.Router do\n  use Phoenix.Router\n{}\nend", src);
        fs::write(root.join("lib/router.ex"), full).unwrap();
        extract(root, &[root.join("lib/router.ex")])
    }

    #[test]
    fn scope_prefixes_fold_into_paths_and_controllers() {
        let routes = routes_from(
            "  scope \"/api\", AppWeb.API do\n    get \"/users\", UserController, :index\n  end",
        );
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.verb, "GET");
        assert_eq!(route.path, "/api/users");
        assert_eq!(route.controller, "AppWeb.API.UserController");
        assert_eq!(route.action, "index");
        assert_eq!(route.router, "AppWeb.Router");
    }

    #[test]
    fn resources_expand_to_the_default_crud_set() {
        let routes = routes_from("  resources \"/users\", UserController");
        assert_eq!(routes.len(), 8);
        let expect = [
            ("DELETE", "/users/:id", "delete"),
            ("GET", "/users", "index"),
            ("GET", "/users/:id", "show"),
            ("GET", "/users/:id/edit", "edit"),
            ("GET", "/users/new", "new"),
            ("PATCH", "/users/:id", "update"),
            ("POST", "/users", "create"),
            ("PUT", "/users/:id", "update"),
        ];
        let got: Vec<_> = routes
            .iter()
            .map(|r| (r.verb.as_str(), r.path.as_str(), r.action.as_str()))
            .collect();
        assert_eq!(got, expect);
    }

    #[test]
    fn resources_honor_only_and_except() {
        let routes = routes_from("  resources \"/posts\", PostController, only: [:index, :show]");
        let actions: Vec<_> = routes.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec!["index", "show"]);

        let routes =
            routes_from("  resources \"/posts\", PostController, except: [:delete, :update]");
        assert!(routes.iter().all(|r| r.action != "delete"));
        assert!(routes.iter().all(|r| r.action != "update"));
        assert_eq!(routes.len(), 5);
    }

    #[test]
    fn nested_resources_use_singularized_parent_id() {
        let routes = routes_from(
            "  resources \"/users\", UserController, only: [:show] do\n    resources \"/posts\", PostController, only: [:index]\n  end",
        );
        let nested = routes
            .iter()
            .find(|r| r.controller.contains("Post"))
            .unwrap();
        assert_eq!(nested.path, "/users/:user_id/posts");
    }

    #[test]
    fn singularization_is_purely_syntactic() {
        assert_eq!(singularize("companies"), "company");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("fish"), "fish");
    }

    #[test]
    fn live_routes_are_gets_with_live_action() {
        let routes =
            routes_from("  scope \"/\", AppWeb do\n    live \"/dash\", DashboardLive\n  end");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].verb, "GET");
        assert_eq!(routes[0].path, "/dash");
        assert_eq!(routes[0].controller, "AppWeb.DashboardLive");
        assert_eq!(routes[0].action, "live");
    }

    #[test]
    fn already_qualified_controllers_are_not_double_prefixed() {
        let routes = routes_from(
            "  scope \"/admin\", AppWeb do\n    get \"/\", AppWeb.AdminController, :home\n  end",
        );
        assert_eq!(routes[0].controller, "AppWeb.AdminController");
        assert_eq!(routes[0].path, "/admin");
    }

    #[test]
    fn paths_never_contain_double_slashes() {
        let routes = routes_from(
            "  scope \"/api/\" do\n    scope \"/v1\" do\n      get \"/users/\", UserController, :index\n    end\n  end",
        );
        assert_eq!(routes[0].path, "/api/v1/users");
        for route in &routes {
            assert!(route.path.starts_with('/'));
            assert!(!route.path.contains("//"));
        }
    }

    #[test]
    fn routes_are_globally_sorted_and_unique() {
        let routes = routes_from(
            "  get \"/b\", BController, :index\n  get \"/a\", AController, :index\n  get \"/a\", AController, :index",
        );
        let paths: Vec<_> = routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn non_router_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(
            root.join("lib/not_router.ex"),
            "defmodule App.Thing do\n  def get(a, b, c), do: {a, b, c}\nend",
        )
        .unwrap();
        assert!(extract(root, &[root.join("lib/not_router.ex")]).is_empty());
    }
}
