use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::Database;

use super::{
    dial, is_safe_credential, parse_backend_addr, Driver, DriverError, Vendor, TEMP_USER_PREFIX,
};

/// MySQL driver. The privileged connection targets the `mysql` admin
/// database; temp accounts are created as `'<user>'@'%'` with global grants.
pub struct MySqlDriver {
    pool: MySqlPool,
    database_name: String,
}

impl MySqlDriver {
    pub(super) async fn connect(database: &Database) -> Result<Self, DriverError> {
        let (host, port) = parse_backend_addr(&database.backend_addr)?;

        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&database.admin_username)
            .password(&database.admin_password)
            .database("mysql");

        // connect_with establishes (and thereby pings) a connection up
        // front, so an unreachable backend fails here and not mid-session.
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| {
                DriverError::Unreachable(format!(
                    "failed to connect to MySQL at {}: {e}",
                    database.backend_addr
                ))
            })?;

        info!("MySQL driver connected for {}", database.name);

        Ok(Self {
            pool,
            database_name: database.name.clone(),
        })
    }
}

#[async_trait]
impl Driver for MySqlDriver {
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
            "creating temp MySQL user {} on {}",
            username, self.database_name
        );

        sqlx::query(&create_user_sql(username, password))
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Provision(format!("failed to create user: {e}")))?;

        for level in levels {
            let Some(sql) = grant_sql(level, username) else {
                warn!("unknown permission level: {}", level);
                continue;
            };
            if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
                error!("failed to grant {} to {}: {}", level, username, e);
            }
        }

        if let Err(e) = sqlx::query("FLUSH PRIVILEGES").execute(&self.pool).await {
            warn!("FLUSH PRIVILEGES failed: {}", e);
        }

        info!(
            "temp MySQL user {} created on {}",
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
            "dropping temp MySQL user {} on {}",
            username, self.database_name
        );

        sqlx::query(&drop_user_sql(username))
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Sql(format!("failed to drop user: {e}")))?;

        if let Err(e) = sqlx::query("FLUSH PRIVILEGES").execute(&self.pool).await {
            warn!("FLUSH PRIVILEGES failed: {}", e);
        }
        Ok(())
    }

    async fn sweep_temp_users(&self) -> Result<u32, DriverError> {
        let rows = sqlx::query(
            "SELECT User FROM mysql.user WHERE User LIKE 'zgate!_%' ESCAPE '!'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::Sql(format!("failed to list gateway accounts: {e}")))?;

        let mut dropped = 0u32;
        for row in rows {
            let username: String = row.get("User");
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
        self.pool.close().await;
    }

    fn vendor(&self) -> Vendor {
        Vendor::Mysql
    }
}

fn create_user_sql(username: &str, password: &str) -> String {
    format!("CREATE USER IF NOT EXISTS '{username}'@'%' IDENTIFIED BY '{password}'")
}

fn drop_user_sql(username: &str) -> String {
    format!("DROP USER IF EXISTS '{username}'@'%'")
}

fn grant_sql(level: &str, username: &str) -> Option<String> {
    let grants = match level {
        "read" => "SELECT",
        "write" => "SELECT, INSERT, UPDATE, DELETE",
        "admin" => "ALL PRIVILEGES",
        _ => return None,
    };
    Some(format!("GRANT {grants} ON *.* TO '{username}'@'%'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_statement() {
        assert_eq!(
            create_user_sql("zgate_alice_1a2b3c4d", "Zaaaaaaaa#bbbbbbbb$Gcccccccc"),
            "CREATE USER IF NOT EXISTS 'zgate_alice_1a2b3c4d'@'%' \
             IDENTIFIED BY 'Zaaaaaaaa#bbbbbbbb$Gcccccccc'"
        );
    }

    #[test]
    fn grant_statements_per_level() {
        assert_eq!(
            grant_sql("read", "zgate_a_00000000").unwrap(),
            "GRANT SELECT ON *.* TO 'zgate_a_00000000'@'%'"
        );
        assert_eq!(
            grant_sql("write", "zgate_a_00000000").unwrap(),
            "GRANT SELECT, INSERT, UPDATE, DELETE ON *.* TO 'zgate_a_00000000'@'%'"
        );
        assert_eq!(
            grant_sql("admin", "zgate_a_00000000").unwrap(),
            "GRANT ALL PRIVILEGES ON *.* TO 'zgate_a_00000000'@'%'"
        );
        assert!(grant_sql("superuser", "zgate_a_00000000").is_none());
    }

    #[test]
    fn drop_user_statement_is_idempotent_form() {
        assert_eq!(
            drop_user_sql("zgate_a_00000000"),
            "DROP USER IF EXISTS 'zgate_a_00000000'@'%'"
        );
    }
}
