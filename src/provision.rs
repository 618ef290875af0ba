//! Relational provisioning protocol.
//!
//! A freshly cloned database is secured by an ordered plan: rename the schema
//! to the owner user, point the search path at it, create the two logins,
//! strip default access, build the app role (DML) and the owner role (app
//! role plus DDL), bind each login to its role and finally hand every
//! existing relation to the owner user.
//!
//! Steps in structural phases abort the plan when they fail. Any other
//! failed statement is logged and recorded as a gap, unless the plan runs in
//! strict mode.

use crate::connection::SqlSession;
use crate::ident::Identifier;
use crate::sql::{self, ObjectKind, RelationKind, TABLE_DML};
use ansi_term::Colour::{Green, Purple, Red, Yellow};
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::fmt;

/// Names derived from the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalNames {
    pub database: Identifier,
    /// Schema name in the source, before the rename
    pub original_schema: Identifier,
    /// Owner login, also the new schema name
    pub owner_user: Identifier,
    pub app_user: Identifier,
    pub app_role: Identifier,
    pub owner_role: Identifier,
}

impl RelationalNames {
    pub fn derive(
        target: &Identifier,
        original_schema: &Identifier,
        app_role_prefix: &str,
        owner_role_prefix: &str,
    ) -> Result<Self> {
        Ok(Self {
            database: target.clone(),
            original_schema: original_schema.clone(),
            owner_user: target.derive("", "_user_owner")?,
            app_user: target.derive("", "_user")?,
            app_role: target.derive(app_role_prefix, "")?,
            owner_role: target.derive(owner_role_prefix, "")?,
        })
    }

    /// The renamed schema.
    pub fn schema(&self) -> &Identifier {
        &self.owner_user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    RenameSchema,
    SearchPath,
    CreateIdentities,
    GrantConnect,
    RevokeDefaults,
    AppRole,
    OwnerRole,
    BindRoles,
    TransferOwnership,
}

impl Phase {
    /// Later phases are meaningless when these fail.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Phase::RenameSchema | Phase::SearchPath | Phase::CreateIdentities
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::RenameSchema => "rename schema",
            Phase::SearchPath => "set search path",
            Phase::CreateIdentities => "create users",
            Phase::GrantConnect => "grant connect",
            Phase::RevokeDefaults => "revoke default access",
            Phase::AppRole => "app role",
            Phase::OwnerRole => "owner role",
            Phase::BindRoles => "grant roles to users",
            Phase::TransferOwnership => "transfer ownership",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Action {
    Sql(String),
    /// Create the login, or reset its password when it already exists
    Login { user: Identifier, password: String },
    /// Create the role unless it already exists
    Role(Identifier),
    /// `ALTER ... OWNER TO` for every table, sequence and view in the schema
    TransferOwnership {
        schema: Identifier,
        owner: Identifier,
    },
}

// Passwords are masked
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Sql(sql) => write!(f, "{}", sql),
            Action::Login { user, .. } => {
                write!(f, "{}", sql::create_login(user, "********"))
            }
            Action::Role(role) => write!(f, "{}", sql::create_role(role)),
            Action::TransferOwnership { schema, owner } => write!(
                f,
                "ALTER TABLE|SEQUENCE|VIEW {}.* OWNER TO {};",
                schema.quoted(),
                owner.quoted()
            ),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub phase: Phase,
    pub action: Action,
}

/// Generated secrets for the two logins.
#[derive(Clone, PartialEq, Eq)]
pub struct Passwords {
    pub owner: String,
    pub app: String,
}

/// Build the ordered plan.
pub fn plan(names: &RelationalNames, passwords: &Passwords, transfer_ownership: bool) -> Vec<Step> {
    let schema = names.schema();
    let mut steps = vec![];
    let mut push = |phase: Phase, action: Action| steps.push(Step { phase, action });

    push(
        Phase::RenameSchema,
        Action::Sql(sql::rename_schema(&names.original_schema, schema)),
    );
    push(
        Phase::SearchPath,
        Action::Sql(sql::set_search_path(
            &names.database,
            &[schema, &names.original_schema],
        )),
    );

    push(
        Phase::CreateIdentities,
        Action::Login {
            user: names.app_user.clone(),
            password: passwords.app.clone(),
        },
    );
    push(
        Phase::CreateIdentities,
        Action::Login {
            user: names.owner_user.clone(),
            password: passwords.owner.clone(),
        },
    );

    push(
        Phase::GrantConnect,
        Action::Sql(sql::grant_on_database("CONNECT", &names.database, &names.owner_user)),
    );

    // Some privilege records still name the schema as it was before the rename
    push(
        Phase::RevokeDefaults,
        Action::Sql(sql::revoke_all_on_database(&names.database, &names.original_schema)),
    );
    push(
        Phase::RevokeDefaults,
        Action::Sql(sql::revoke_on_schema("CREATE", schema, &names.original_schema)),
    );

    push(Phase::AppRole, Action::Role(names.app_role.clone()));
    for sql in access_grants(names, &names.app_role) {
        push(Phase::AppRole, Action::Sql(sql));
    }

    // owner role: everything the app role has, plus DDL
    push(Phase::OwnerRole, Action::Role(names.owner_role.clone()));
    for sql in access_grants(names, &names.owner_role) {
        push(Phase::OwnerRole, Action::Sql(sql));
    }
    push(
        Phase::OwnerRole,
        Action::Sql(sql::grant_on_schema("CREATE", schema, &names.owner_role)),
    );
    push(
        Phase::OwnerRole,
        Action::Sql(sql::grant_on_database(
            "CREATE, TEMPORARY",
            &names.database,
            &names.owner_role,
        )),
    );

    push(
        Phase::BindRoles,
        Action::Sql(sql::grant_role(&names.app_role, &names.app_user)),
    );
    push(
        Phase::BindRoles,
        Action::Sql(sql::grant_role(&names.owner_role, &names.owner_user)),
    );

    if transfer_ownership {
        push(
            Phase::TransferOwnership,
            Action::TransferOwnership {
                schema: schema.clone(),
                owner: names.owner_user.clone(),
            },
        );
    }

    steps
}

/// DML access on the renamed schema, today and for whatever the owner user
/// creates later.
fn access_grants(names: &RelationalNames, role: &Identifier) -> Vec<String> {
    let schema = names.schema();

    vec![
        sql::grant_on_database("CONNECT", &names.database, role),
        sql::grant_on_schema("USAGE", schema, role),
        sql::grant_on_all(TABLE_DML, ObjectKind::Tables, schema, role),
        sql::grant_on_all("USAGE", ObjectKind::Sequences, schema, role),
        sql::alter_default_privileges(&names.owner_user, schema, TABLE_DML, ObjectKind::Tables, role),
        sql::alter_default_privileges(&names.owner_user, schema, "USAGE", ObjectKind::Sequences, role),
        sql::alter_default_privileges(&names.owner_user, schema, "EXECUTE", ObjectKind::Functions, role),
    ]
}

/// Statements that failed without aborting the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub failed_statements: Vec<String>,
}

/// Execute the plan on a session opened on the target database.
pub fn execute(session: &mut dyn SqlSession, steps: &[Step], strict: bool) -> Result<ProvisionOutcome> {
    let mut outcome = ProvisionOutcome::default();

    for step in steps {
        match &step.action {
            Action::TransferOwnership { schema, owner } => {
                transfer_ownership(session, schema, owner, strict, &mut outcome)?;
            }
            action => {
                if let Err(e) = run_action(session, action) {
                    report_failure(step.phase, &action.to_string(), &e);

                    if step.phase.is_structural() {
                        return Err(anyhow!(
                            "structural step `{}` failed, database is partially provisioned: {}: {:#}",
                            step.phase,
                            action,
                            e
                        ));
                    }
                    if strict {
                        return Err(anyhow!(
                            "`{}` failed in strict mode: {}: {:#}",
                            step.phase,
                            action,
                            e
                        ));
                    }
                    outcome.failed_statements.push(action.to_string());
                }
            }
        }
    }

    Ok(outcome)
}

/// Log the plan without running anything.
pub fn dry_run(steps: &[Step]) {
    for step in steps {
        info!(
            "{}: [{}] {}",
            Purple.paint("Dry-run"),
            step.phase,
            Purple.paint(step.action.to_string())
        );
    }
}

fn run_action(session: &mut dyn SqlSession, action: &Action) -> Result<()> {
    match action {
        Action::Sql(sql) => session.execute(sql)?,
        Action::Login { user, password } => {
            if session.query_count(sql::ROLE_EXISTS, &[user.as_str()])? > 0 {
                warn!(
                    "{}: user {} already exists, resetting its password",
                    Yellow.paint("Warning"),
                    user
                );
                session.execute(&sql::alter_login_password(user, password))?;
            } else {
                session.execute(&sql::create_login(user, password))?;
            }
        }
        Action::Role(role) => {
            if session.query_count(sql::ROLE_EXISTS, &[role.as_str()])? > 0 {
                warn!(
                    "{}: role {} already exists, reusing it",
                    Yellow.paint("Warning"),
                    role
                );
                return Ok(());
            }
            session.execute(&sql::create_role(role))?;
        }
        Action::TransferOwnership { .. } => unreachable!("expanded by the caller"),
    }

    info!("{}: {}", Green.paint("Success"), Purple.paint(action.to_string()));

    Ok(())
}

fn transfer_ownership(
    session: &mut dyn SqlSession,
    schema: &Identifier,
    owner: &Identifier,
    strict: bool,
    outcome: &mut ProvisionOutcome,
) -> Result<()> {
    for kind in [RelationKind::Table, RelationKind::Sequence, RelationKind::View] {
        let names = match session.query_names(kind.list_query(), &[schema.as_str()]) {
            Ok(names) => names,
            Err(e) => {
                let intent = format!("list {} objects in {}", kind.as_sql(), schema);
                report_failure(Phase::TransferOwnership, &intent, &e);
                if strict {
                    return Err(e.context(intent));
                }
                outcome.failed_statements.push(intent);
                continue;
            }
        };

        for name in names {
            let sql = sql::alter_owner(kind, schema, &name, owner);
            match session.execute(&sql) {
                Ok(()) => info!("{}: {}", Green.paint("Success"), Purple.paint(&sql)),
                Err(e) => {
                    report_failure(Phase::TransferOwnership, &sql, &e);
                    if strict {
                        return Err(e.context(sql));
                    }
                    outcome.failed_statements.push(sql);
                }
            }
        }
    }

    Ok(())
}

fn report_failure(phase: Phase, intent: &str, e: &anyhow::Error) {
    error!("{}: [{}] {}", Red.paint("Error"), phase, intent);
    error!("  -> {}: {:#}", Red.paint("Error details"), e);

    if phase == Phase::RenameSchema {
        error!(
            "  -> {}",
            Red.paint("schema was NOT renamed, the database is not provisioned")
        );
    }
}
