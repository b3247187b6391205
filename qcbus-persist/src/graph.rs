//! 关系图（RelationshipGraph）
//!
//! 启动时由全部实体描述构建的只读映射：实体 → 有序出边列表。
//! 构建时校验目标实体、连接列与主键是否存在，构建完成后不可变，
//! 以 `Arc<RelationshipGraph>` 注入查询引擎与预加载解析器。
//!
use crate::error::{PersistError, PersistResult};
use crate::schema::{Cardinality, EntitySchema, JoinCondition, Relationship};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RelationshipGraph {
    entities: HashMap<String, Arc<EntitySchema>>,
    edges: HashMap<String, Vec<Relationship>>,
}

impl RelationshipGraph {
    pub fn builder() -> RelationshipGraphBuilder {
        RelationshipGraphBuilder::default()
    }

    pub fn entity(&self, name: &str) -> PersistResult<Arc<EntitySchema>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| PersistError::UnknownEntity(name.to_owned()))
    }

    pub fn relationships(&self, entity: &str) -> &[Relationship] {
        self.edges.get(entity).map(Vec::as_slice).unwrap_or_default()
    }

    /// 解析一个预加载名称为关系路径
    ///
    /// - 点分名称（`author.company`）逐段沿出边解析；
    /// - 普通名称从 `start` 做广度优先搜索，返回第一条名称匹配的边所在路径；
    /// - 找不到时返回空路径（调用方忽略该请求）。
    pub fn resolve(&self, start: &str, name: &str) -> Vec<&Relationship> {
        if name.contains('.') {
            return self.walk(start, name);
        }
        self.find_path(start, name)
    }

    fn walk(&self, start: &str, dotted: &str) -> Vec<&Relationship> {
        let mut path = Vec::new();
        let mut current = start;
        for segment in dotted.split('.') {
            let Some(edge) = self.relationships(current).iter().find(|r| r.name() == segment)
            else {
                return Vec::new();
            };
            current = edge.target();
            path.push(edge);
        }
        path
    }

    /// 广度优先搜索；已访问实体集合保证有环图也能终止
    pub fn find_path(&self, start: &str, name: &str) -> Vec<&Relationship> {
        let mut queue: VecDeque<(&str, Vec<&Relationship>)> = VecDeque::from([(start, Vec::new())]);
        let mut checked: HashSet<&str> = HashSet::new();

        while let Some((node, path)) = queue.pop_front() {
            if !checked.insert(node) {
                continue;
            }

            for edge in self.relationships(node) {
                let mut next = path.clone();
                next.push(edge);

                if edge.name() == name {
                    return next;
                }

                queue.push_back((edge.target(), next));
            }
        }

        Vec::new()
    }
}

#[derive(Debug, Default)]
pub struct RelationshipGraphBuilder {
    entities: Vec<EntitySchema>,
    edges: Vec<(String, Relationship)>,
}

impl RelationshipGraphBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        self.entities.push(schema);
        self
    }

    pub fn relationship(mut self, source: impl Into<String>, relationship: Relationship) -> Self {
        self.edges.push((source.into(), relationship));
        self
    }

    pub fn build(self) -> PersistResult<RelationshipGraph> {
        let mut entities = HashMap::new();
        for schema in self.entities {
            if !schema.has_primary_key() {
                return Err(PersistError::precondition(format!(
                    "entity `{}` must declare exactly one primary key column",
                    schema.name()
                )));
            }
            entities.insert(schema.name().to_owned(), Arc::new(schema));
        }

        let mut edges: HashMap<String, Vec<Relationship>> = HashMap::new();
        for (source, rel) in self.edges {
            validate(&entities, &source, &rel)?;
            edges.entry(source).or_default().push(rel);
        }

        Ok(RelationshipGraph { entities, edges })
    }
}

fn validate(
    entities: &HashMap<String, Arc<EntitySchema>>,
    source: &str,
    rel: &Relationship,
) -> PersistResult<()> {
    let invalid = |reason: String| PersistError::InvalidRelationship {
        entity: source.to_owned(),
        relationship: rel.name().to_owned(),
        reason,
    };

    let src = entities
        .get(source)
        .ok_or_else(|| PersistError::UnknownEntity(source.to_owned()))?;
    let dst = entities
        .get(rel.target())
        .ok_or_else(|| invalid(format!("unknown target entity `{}`", rel.target())))?;

    if src.has_column(rel.name()) {
        return Err(invalid("relationship name shadows a column".into()));
    }
    if !src.has_column(rel.local_column()) {
        return Err(invalid(format!("unknown local column `{}`", rel.local_column())));
    }
    if !dst.has_column(rel.remote_column()) {
        return Err(invalid(format!("unknown remote column `{}`", rel.remote_column())));
    }

    let secondary = matches!(rel.join(), JoinCondition::Secondary { .. });
    if secondary != (rel.cardinality() == Cardinality::ManyToMany) {
        return Err(invalid(
            "many-to-many relationships (and only those) use a secondary table".into(),
        ));
    }

    Ok(())
}
