use super::{Query, QueryBase, decode, decode_all};
use crate::error::{PersistError, PersistResult};
use crate::schema::{Entity, EntitySchema};
use crate::session::Session;
use crate::statement::{Fields, SqlWriter, Statement, quote};
use async_trait::async_trait;

/// 插入一行；唯一约束冲突时不插入并返回 `None`
pub struct Create<E> {
    base: QueryBase<E>,
    fields: Fields,
}

impl<E: Entity> Create<E> {
    pub(super) fn new(base: QueryBase<E>, fields: Fields) -> Self {
        Self { base, fields }
    }
}

#[async_trait]
impl<E: Entity> Query for Create<E> {
    type Output = Option<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Option<E>> {
        let schema = self.base.schema()?;
        let row = self.fields.checked(schema, true)?;
        let stmt = insert(schema, std::slice::from_ref(&row))?;
        let rows = session.fetch_all(&stmt).await?;
        rows.into_iter().next().map(decode).transpose()
    }
}

/// 单条语句插入多行，冲突的行被跳过
pub struct BatchCreate<E> {
    base: QueryBase<E>,
    rows: Vec<Fields>,
}

impl<E: Entity> BatchCreate<E> {
    pub(super) fn new(base: QueryBase<E>, rows: Vec<Fields>) -> Self {
        Self { base, rows }
    }
}

#[async_trait]
impl<E: Entity> Query for BatchCreate<E> {
    type Output = Vec<E>;

    async fn execute(&self, session: &mut dyn Session) -> PersistResult<Vec<E>> {
        let schema = self.base.schema()?;
        let rows = self
            .rows
            .iter()
            .map(|row| row.checked(schema, true))
            .collect::<PersistResult<Vec<_>>>()?;
        let stmt = insert(schema, &rows)?;
        decode_all(session.fetch_all(&stmt).await?)
    }
}

fn insert(schema: &EntitySchema, rows: &[Fields]) -> PersistResult<Statement> {
    let Some(first) = rows.first() else {
        return Err(PersistError::precondition("data to create should not be empty"));
    };
    let columns = first.columns();
    let uniform = rows
        .iter()
        .all(|row| row.len() == columns.len() && columns.iter().all(|c| row.contains(c)));
    if !uniform {
        return Err(PersistError::precondition(
            "all rows of a batch must set the same columns",
        ));
    }

    let table = quote(schema.table());
    if columns.is_empty() {
        if rows.len() > 1 {
            return Err(PersistError::precondition(
                "batch rows must set at least one column",
            ));
        }
        return Ok(
            Statement::raw(format!("INSERT INTO {table} DEFAULT VALUES RETURNING *"))
                .returning(schema),
        );
    }

    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let mut w = SqlWriter::new(format!("INSERT INTO {table} ({}) VALUES ", names.join(", ")));
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.bind_list(columns.iter().map(|c| row.value_of(c)));
    }
    w.push(" ON CONFLICT DO NOTHING RETURNING *");
    Ok(w.finish().returning(schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::value::{ColumnType, Value};

    fn users() -> EntitySchema {
        EntitySchema::new("user", "users")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("login", ColumnType::Text))
    }

    #[test]
    fn batch_insert_binds_rows_in_column_order() {
        let rows = vec![
            Fields::new().set("id", 1).set("login", "a"),
            Fields::new().set("login", "b").set("id", 2),
        ];
        let stmt = insert(&users(), &rows).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "users" ("id", "login") VALUES ($1, $2), ($3, $4) ON CONFLICT DO NOTHING RETURNING *"#
        );
        assert_eq!(stmt.params[2], Value::Int(2));
        assert_eq!(stmt.params[3], Value::Text("b".into()));
    }

    #[test]
    fn batch_rejects_empty_and_ragged_rows() {
        let err = insert(&users(), &[]).unwrap_err();
        assert!(matches!(err, PersistError::Precondition { .. }));

        let rows = vec![
            Fields::new().set("id", 1).set("login", "a"),
            Fields::new().set("id", 2),
        ];
        let err = insert(&users(), &rows).unwrap_err();
        assert!(matches!(err, PersistError::Precondition { .. }));
    }
}
