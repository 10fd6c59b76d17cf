//! Hand-written Elixir parser.
//!
//! - [`lexer`] - byte-level tokenizer (strings, heredocs, sigils, atoms)
//! - [`ast`] - the expression tree and its textual renderer
//! - [`parse`] - tolerant recursive descent with Elixir-like precedence
//!
//! The extraction phases only ever consume the [`ast::Expr`] tree; nothing
//! outside this module touches tokens.

pub mod ast;
pub mod lexer;
mod parse;

pub use ast::{render, Call, Expr};
pub use parse::{parse, ParseError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_alias_directive() {
        let items = parse("alias AppWeb.{Endpoint, Router}").unwrap();
        let call = items[0].as_call().unwrap();
        assert_eq!(call.name, "alias");
        let expansion = call.args[0].as_call().unwrap();
        assert_eq!(expansion.name, "{}");
        assert_eq!(
            expansion.target.as_ref().and_then(|t| t.alias_name()).as_deref(),
            Some("AppWeb")
        );
        assert_eq!(expansion.args.len(), 2);
    }

    #[test]
    fn parses_a_realistic_module_end_to_end() {
        let src = r#"
defmodule App.Accounts do
  @moduledoc """
  Account management context.
  """

  import Ecto.Query, only: [from: 2]
  alias App.{Repo, User}

  @spec get_user!(integer()) :: User.t()
  def get_user!(id), do: Repo.get!(User, id)

  def list_users do
    User
    |> from(order_by: :inserted_at)
    |> Repo.all()
  end

  defp audit(action, user) do
    App.Audit.log(action, user.id)
  end
end
"#;
        let items = parse(src).unwrap();
        assert_eq!(items.len(), 1);
        let module = items[0].as_call().unwrap();
        assert_eq!(module.name, "defmodule");
        let body = module.do_block().unwrap();
        let names: Vec<_> = body
            .iter()
            .filter_map(|e| e.as_call().map(|c| c.name.clone()))
            .collect();
        assert_eq!(names, vec!["import", "alias", "def", "def", "defp"]);
    }
}
