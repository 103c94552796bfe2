use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::Database;

use super::{
    dial, is_safe_credential, parse_backend_addr, Driver, DriverError, Vendor, TEMP_USER_PREFIX,
};

type TdsClient = Client<Compat<TcpStream>>;

/// Microsoft SQL Server driver. The privileged connection targets `master`;
/// a temp account is a server login plus a database user for that login.
pub struct MssqlDriver {
    client: Mutex<Option<TdsClient>>,
    database_name: String,
}

impl MssqlDriver {
    pub(super) async fn connect(database: &Database) -> Result<Self, DriverError> {
        let (host, port) = parse_backend_addr(&database.backend_addr)?;

        let mut config = Config::new();
        config.host(&host);
        config.port(port);
        config.database("master");
        config.authentication(AuthMethod::sql_server(
            &database.admin_username,
            &database.admin_password,
        ));
        config.trust_cert();

        let tcp = TcpStream::connect((host.as_str(), port)).await.map_err(|e| {
            DriverError::Unreachable(format!(
                "failed to connect to MSSQL at {}: {e}",
                database.backend_addr
            ))
        })?;
        tcp.set_nodelay(true).map_err(|e| {
            DriverError::Unreachable(format!("failed to configure MSSQL socket: {e}"))
        })?;

        // The TDS login handshake doubles as the reachability ping.
        let client = Client::connect(config, tcp.compat_write()).await.map_err(|e| {
            DriverError::Unreachable(format!(
                "failed to log in to MSSQL at {}: {e}",
                database.backend_addr
            ))
        })?;

        info!("MSSQL driver connected for {}", database.name);

        Ok(Self {
            client: Mutex::new(Some(client)),
            database_name: database.name.clone(),
        })
    }

    async fn execute(&self, sql: &str) -> Result<(), DriverError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DriverError::Sql("driver already closed".into()))?;
        client
            .execute(sql, &[])
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Sql(e.to_string()))
    }

    async fn query_names(&self, sql: &str) -> Result<Vec<String>, DriverError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DriverError::Sql("driver already closed".into()))?;
        let rows = client
            .simple_query(sql)
            .await
            .map_err(|e| DriverError::Sql(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| DriverError::Sql(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, usize>(0).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl Driver for MssqlDriver {
    async fn connect_tcp(
        &self,
        addr: &str,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, DriverError> {
        dial(addr, cancel).await
    }

    async fn create_temp_user(
        &self,
        username: &str,
        password: &str,
        levels: &[String],
    ) -> Result<(), DriverError> {
        if !is_safe_credential(username) || !is_safe_credential(password) {
            return Err(DriverError::Provision(
                "generated credentials outside the DDL-safe character domain".into(),
            ));
        }

        info!(
            "creating temp MSSQL user {} on {}",
            username, self.database_name
        );

        self.execute(&create_login_sql(username, password))
            .await
            .map_err(|e| DriverError::Provision(format!("failed to create login: {e}")))?;

        if let Err(e) = self.execute(&create_user_sql(username)).await {
            // Roll back the login so a half-created account never lingers.
            if let Err(drop_err) = self.drop_temp_user(username).await {
                warn!("rollback of login {} failed: {}", username, drop_err);
            }
            return Err(DriverError::Provision(format!("failed to create user: {e}")));
        }

        for level in levels {
            let Some(sql) = grant_sql(level, username) else {
                warn!("unknown permission level: {}", level);
                continue;
            };
            if let Err(e) = self.execute(&sql).await {
                error!("failed to grant {} to {}: {}", level, username, e);
            }
        }

        info!(
            "temp MSSQL user {} created on {}",
            username, self.database_name
        );
        Ok(())
    }

    async fn drop_temp_user(&self, username: &str) -> Result<(), DriverError> {
        if !is_safe_credential(username) {
            return Err(DriverError::Sql(
                "refusing to drop user with unsafe name".into(),
            ));
        }

        info!(
            "dropping temp MSSQL user {} on {}",
            username, self.database_name
        );

        // User first, then login; both conditional so partially created
        // accounts and repeat calls are fine.
        self.execute(&drop_user_sql(username)).await?;
        self.execute(&drop_login_sql(username)).await?;
        Ok(())
    }

    async fn sweep_temp_users(&self) -> Result<u32, DriverError> {
        let names = self
            .query_names(
                "SELECT name FROM sys.server_principals WHERE name LIKE 'zgate[_]%'",
            )
            .await?;

        let mut dropped = 0u32;
        for username in names {
            if !username.starts_with(TEMP_USER_PREFIX) || !is_safe_credential(&username) {
                continue;
            }
            match self.drop_temp_user(&username).await {
                Ok(()) => dropped += 1,
                Err(e) => warn!("failed to drop orphaned account {}: {}", username, e),
            }
        }
        Ok(dropped)
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.close().await {
                warn!("error closing MSSQL connection: {}", e);
            }
        }
    }

    fn vendor(&self) -> Vendor {
        Vendor::Mssql
    }
}

fn create_login_sql(username: &str, password: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.server_principals WHERE name = '{username}')\n\
         BEGIN\n\
         \tCREATE LOGIN [{username}] WITH PASSWORD = '{password}'\n\
         END"
    )
}

fn create_user_sql(username: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.database_principals WHERE name = '{username}')\n\
         BEGIN\n\
         \tCREATE USER [{username}] FOR LOGIN [{username}]\n\
         END"
    )
}

fn drop_user_sql(username: &str) -> String {
    format!(
        "IF EXISTS (SELECT * FROM sys.database_principals WHERE name = '{username}')\n\
         BEGIN\n\
         \tDROP USER [{username}]\n\
         END"
    )
}

fn drop_login_sql(username: &str) -> String {
    format!(
        "IF EXISTS (SELECT * FROM sys.server_principals WHERE name = '{username}')\n\
         BEGIN\n\
         \tDROP LOGIN [{username}]\n\
         END"
    )
}

fn grant_sql(level: &str, username: &str) -> Option<String> {
    match level {
        "read" => Some(format!("GRANT SELECT TO [{username}]")),
        "write" => Some(format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE TO [{username}]"
        )),
        "admin" => Some(format!("ALTER ROLE db_owner ADD MEMBER [{username}]")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_statement_is_conditional() {
        let sql = create_login_sql("zgate_a_00000000", "Zaaaaaaaa#bbbbbbbb$Gcccccccc");
        assert!(sql.starts_with("IF NOT EXISTS"));
        assert!(sql.contains("CREATE LOGIN [zgate_a_00000000]"));
        assert!(sql.contains("PASSWORD = 'Zaaaaaaaa#bbbbbbbb$Gcccccccc'"));
    }

    #[test]
    fn user_statement_binds_login() {
        let sql = create_user_sql("zgate_a_00000000");
        assert!(sql.contains("CREATE USER [zgate_a_00000000] FOR LOGIN [zgate_a_00000000]"));
    }

    #[test]
    fn grant_statements_per_level() {
        assert_eq!(
            grant_sql("read", "zgate_a_00000000").unwrap(),
            "GRANT SELECT TO [zgate_a_00000000]"
        );
        assert_eq!(
            grant_sql("write", "zgate_a_00000000").unwrap(),
            "GRANT SELECT, INSERT, UPDATE, DELETE TO [zgate_a_00000000]"
        );
        assert_eq!(
            grant_sql("admin", "zgate_a_00000000").unwrap(),
            "ALTER ROLE db_owner ADD MEMBER [zgate_a_00000000]"
        );
        assert!(grant_sql("dbo", "zgate_a_00000000").is_none());
    }

    #[test]
    fn drop_statements_are_conditional_and_ordered() {
        assert!(drop_user_sql("zgate_a_00000000").contains("DROP USER"));
        assert!(drop_login_sql("zgate_a_00000000").contains("DROP LOGIN"));
    }
}
