//! Warehouse collaborator: issues the UNLOAD that writes query results to storage.

use crate::run::Query;
use async_trait::async_trait;

/// Parameters of one unload operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadRequest {
    /// Query whose result set is unloaded
    pub query: Query,

    /// Destination prefix URI (`s3://bucket/prefix/`)
    pub destination: String,

    /// Field delimiter
    pub delimiter: char,

    /// Whether the warehouse compresses the shards
    pub compressed: bool,

    /// Role the warehouse assumes to write to the destination
    pub iam_role: String,
}

impl UnloadRequest {
    /// Render the request as an UNLOAD statement.
    ///
    /// Single quotes in the query, destination and role are doubled so the
    /// values stay inside their string literals.
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "UNLOAD ('{}') TO '{}' IAM_ROLE '{}' DELIMITER AS '{}'",
            escape_literal(self.query.as_str()),
            escape_literal(&self.destination),
            escape_literal(&self.iam_role),
            escape_literal(&self.delimiter.to_string()),
        );
        if self.compressed {
            sql.push_str(" GZIP");
        }
        sql
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// A warehouse able to unload a query result to object storage.
///
/// `unload` returns once the shards are listable under the destination prefix.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn unload(&self, request: &UnloadRequest) -> anyhow::Result<()>;
}

/// Warehouse reached over the Postgres wire protocol (e.g. Redshift).
///
/// The client is connected by the caller; this type only issues statements.
pub struct PostgresWarehouse {
    client: tokio_postgres::Client,
}

impl PostgresWarehouse {
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn unload(&self, request: &UnloadRequest) -> anyhow::Result<()> {
        tracing::debug!("Issuing unload to {}", request.destination);
        self.client.batch_execute(&request.to_sql()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> UnloadRequest {
        UnloadRequest {
            query: Query::new(query),
            destination: "s3://bucket/unload/abc/".to_string(),
            delimiter: ',',
            compressed: false,
            iam_role: "arn:aws:iam::123:role/unload".to_string(),
        }
    }

    #[test]
    fn test_unload_sql() {
        let sql = request("select * from events").to_sql();
        assert_eq!(
            sql,
            "UNLOAD ('select * from events') TO 's3://bucket/unload/abc/' \
             IAM_ROLE 'arn:aws:iam::123:role/unload' DELIMITER AS ','"
        );
    }

    #[test]
    fn test_unload_sql_escapes_quotes() {
        let sql = request("select * from venue where state = 'NV'").to_sql();
        assert!(sql.starts_with("UNLOAD ('select * from venue where state = ''NV''')"));
    }

    #[test]
    fn test_unload_sql_compressed() {
        let mut req = request("select 1");
        req.compressed = true;
        assert!(req.to_sql().ends_with(" GZIP"));
    }
}
