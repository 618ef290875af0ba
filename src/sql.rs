//! Postgres statement builders.
//!
//! Every function takes validated [`Identifier`] values and emits quoted
//! identifiers, so nothing from configuration is interpolated raw.

use crate::ident::{quote_ident, quote_literal, Identifier};

/// Privileges the app role gets on every table.
pub const TABLE_DML: &str = "SELECT, INSERT, UPDATE, DELETE";

pub const SELECT_ONE: &str = "SELECT 1";

pub const DATABASE_EXISTS: &str = "SELECT count(*) FROM pg_database WHERE datname = $1";

pub const ROLE_EXISTS: &str = "SELECT count(*) FROM pg_roles WHERE rolname = $1";

/// Non-idle sessions on a database, not counting the caller.
pub const ACTIVE_CONNECTIONS: &str = "SELECT count(*) FROM pg_stat_activity \
     WHERE datname = $1 AND state IS DISTINCT FROM 'idle' AND pid <> pg_backend_pid()";

pub const SCHEMA_TABLES: &str =
    "SELECT tablename::text FROM pg_tables WHERE schemaname = $1 ORDER BY 1";

pub const SCHEMA_SEQUENCES: &str =
    "SELECT sequencename::text FROM pg_sequences WHERE schemaname = $1 ORDER BY 1";

pub const SCHEMA_VIEWS: &str =
    "SELECT viewname::text FROM pg_views WHERE schemaname = $1 ORDER BY 1";

/// Kinds of objects that can be granted on in bulk or have default privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Tables,
    Sequences,
    Functions,
}

impl ObjectKind {
    fn as_sql(&self) -> &'static str {
        match self {
            ObjectKind::Tables => "TABLES",
            ObjectKind::Sequences => "SEQUENCES",
            ObjectKind::Functions => "FUNCTIONS",
        }
    }
}

/// Kinds of relations whose owner is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    Sequence,
    View,
}

impl RelationKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            RelationKind::Table => "TABLE",
            RelationKind::Sequence => "SEQUENCE",
            RelationKind::View => "VIEW",
        }
    }

    /// Catalog query listing relations of this kind in a schema.
    pub fn list_query(&self) -> &'static str {
        match self {
            RelationKind::Table => SCHEMA_TABLES,
            RelationKind::Sequence => SCHEMA_SEQUENCES,
            RelationKind::View => SCHEMA_VIEWS,
        }
    }
}

pub fn create_database_from_template(target: &Identifier, template: &Identifier) -> String {
    format!(
        "CREATE DATABASE {} TEMPLATE {};",
        target.quoted(),
        template.quoted()
    )
}

pub fn rename_schema(from: &Identifier, to: &Identifier) -> String {
    format!("ALTER SCHEMA {} RENAME TO {};", from.quoted(), to.quoted())
}

pub fn set_search_path(database: &Identifier, path: &[&Identifier]) -> String {
    let path = path
        .iter()
        .map(|s| s.quoted())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "ALTER DATABASE {} SET search_path TO {};",
        database.quoted(),
        path
    )
}

/// `CREATE USER`, with the password literal. Never log the result.
pub fn create_login(user: &Identifier, password: &str) -> String {
    format!(
        "CREATE USER {} WITH LOGIN PASSWORD {};",
        user.quoted(),
        quote_literal(password)
    )
}

/// `ALTER USER ... PASSWORD`, with the password literal. Never log the result.
pub fn alter_login_password(user: &Identifier, password: &str) -> String {
    format!(
        "ALTER USER {} WITH LOGIN PASSWORD {};",
        user.quoted(),
        quote_literal(password)
    )
}

pub fn create_role(role: &Identifier) -> String {
    format!("CREATE ROLE {};", role.quoted())
}

pub fn grant_on_database(privileges: &str, database: &Identifier, grantee: &Identifier) -> String {
    format!(
        "GRANT {} ON DATABASE {} TO {};",
        privileges,
        database.quoted(),
        grantee.quoted()
    )
}

pub fn revoke_all_on_database(database: &Identifier, grantee: &Identifier) -> String {
    format!(
        "REVOKE ALL ON DATABASE {} FROM {};",
        database.quoted(),
        grantee.quoted()
    )
}

pub fn grant_on_schema(privileges: &str, schema: &Identifier, grantee: &Identifier) -> String {
    format!(
        "GRANT {} ON SCHEMA {} TO {};",
        privileges,
        schema.quoted(),
        grantee.quoted()
    )
}

pub fn revoke_on_schema(privileges: &str, schema: &Identifier, grantee: &Identifier) -> String {
    format!(
        "REVOKE {} ON SCHEMA {} FROM {};",
        privileges,
        schema.quoted(),
        grantee.quoted()
    )
}

pub fn grant_on_all(
    privileges: &str,
    kind: ObjectKind,
    schema: &Identifier,
    grantee: &Identifier,
) -> String {
    format!(
        "GRANT {} ON ALL {} IN SCHEMA {} TO {};",
        privileges,
        kind.as_sql(),
        schema.quoted(),
        grantee.quoted()
    )
}

/// Extend a grant to objects `creator` makes in `schema` from now on.
pub fn alter_default_privileges(
    creator: &Identifier,
    schema: &Identifier,
    privileges: &str,
    kind: ObjectKind,
    grantee: &Identifier,
) -> String {
    format!(
        "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} GRANT {} ON {} TO {};",
        creator.quoted(),
        schema.quoted(),
        privileges,
        kind.as_sql(),
        grantee.quoted()
    )
}

pub fn grant_role(role: &Identifier, user: &Identifier) -> String {
    format!("GRANT {} TO {};", role.quoted(), user.quoted())
}

/// Object names come from the catalog and are escaped rather than validated.
pub fn alter_owner(
    kind: RelationKind,
    schema: &Identifier,
    object: &str,
    owner: &Identifier,
) -> String {
    format!(
        "ALTER {} {}.{} OWNER TO {};",
        kind.as_sql(),
        schema.quoted(),
        quote_ident(object),
        owner.quoted()
    )
}
