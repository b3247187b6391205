//! 预加载规划（eager loading）
//!
//! 把请求的关系名称解析成加载树，再编译为可复用的查询计划：
//!
//! - 单值关系（一对一、多对一）以 `LEFT OUTER JOIN` 并入主语句，
//!   列以 `tN__列名` 取别名，取回后按关系名嵌套回父记录（不存在则为 `null`）；
//! - 集合关系（一对多、多对多）各自一条子查询，按父键分区、目标主键倒序编号，
//!   每个父记录最多取 [`DEFAULT_RELATIONSHIP_LOAD_LIMIT`] 条，以数组挂到父记录上；
//!   更深的关系在子查询内部递归规划。
//!
//! 计划只取决于 (实体, 解析后的加载树)，编译后缓存并以 `Arc` 共享；
//! 缓存条目数有上限，满了随机淘汰一条。
//!
use crate::error::PersistResult;
use crate::graph::RelationshipGraph;
use crate::schema::{EntitySchema, JoinCondition, Relationship};
use crate::session::Session;
use crate::statement::{ResultTypes, SqlWriter, Statement, qualified, quote, require_column};
use crate::value::{ColumnType, Record, Value};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// 集合关系每个父记录最多加载的条数
pub const DEFAULT_RELATIONSHIP_LOAD_LIMIT: i64 = 20;

/// 主实体在语句中的别名
pub(crate) const ROOT_ALIAS: &str = "t0";

const LINK_ALIAS: &str = "lnk";
const PARTITION_ALIAS: &str = "s";
const PARENT_KEY: &str = "__parent";
const ROW_NUMBER: &str = "__rn";

/// 计划缓存的条目上限
pub const PLAN_CACHE_CAPACITY: usize = 128;

/// 加载树节点
#[derive(Debug)]
struct LoadNode<'g> {
    edge: &'g Relationship,
    children: Vec<LoadNode<'g>>,
}

/// 把所有请求名称的路径合并成一棵树；同一目标实体在整棵树中最多出现一次
fn load_tree<'g>(
    graph: &'g RelationshipGraph,
    entity: &str,
    loads: &[String],
) -> Vec<LoadNode<'g>> {
    let mut roots: Vec<LoadNode<'g>> = Vec::new();
    let mut seen: HashSet<&'g str> = HashSet::new();

    for name in loads {
        let mut level = &mut roots;
        for edge in graph.resolve(entity, name) {
            let pos = match level.iter().position(|n| n.edge.name() == edge.name()) {
                Some(pos) => pos,
                None => {
                    if !seen.insert(edge.target()) {
                        break;
                    }
                    level.push(LoadNode {
                        edge,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            level = &mut level[pos].children;
        }
    }

    roots
}

/// 加载树的规范签名，如 `author,comments(writer)`；未知名称不出现在签名里
fn tree_signature(tree: &[LoadNode<'_>]) -> String {
    tree.iter()
        .map(|node| {
            if node.children.is_empty() {
                node.edge.name().to_owned()
            } else {
                format!("{}({})", node.edge.name(), tree_signature(&node.children))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn nested_name(alias: &str, column: &str) -> String {
    format!("{alias}__{column}")
}

/// 一个经 JOIN 并入的单值关系
#[derive(Debug)]
struct Nest {
    /// 父节点：`None` 为主实体，否则为 `nests` 中的下标
    owner: Option<usize>,
    relation: String,
    alias: String,
    columns: Vec<String>,
    pk: String,
}

/// 一个以子查询加载的集合关系
#[derive(Debug)]
struct CollectionPlan {
    owner: Option<usize>,
    relation: String,
    local: String,
    local_ty: ColumnType,
    parent_expr: String,
    link_sql: Option<String>,
    target_pk: String,
    plan: SelectPlan,
}

/// 编译后的查询计划
#[derive(Debug)]
pub struct SelectPlan {
    columns_sql: String,
    from_sql: String,
    root_columns: Vec<String>,
    /// 主语句各结果列（含 JOIN 别名列）的声明类型
    types: ResultTypes,
    nests: Vec<Nest>,
    collections: Vec<CollectionPlan>,
}

impl SelectPlan {
    fn compile(
        graph: &RelationshipGraph,
        schema: &EntitySchema,
        tree: &[LoadNode<'_>],
    ) -> PersistResult<Self> {
        let mut plan = SelectPlan {
            columns_sql: String::new(),
            from_sql: format!("{} AS {}", quote(schema.table()), quote(ROOT_ALIAS)),
            root_columns: Vec::new(),
            types: ResultTypes::new(),
            nests: Vec::new(),
            collections: Vec::new(),
        };

        let mut columns = Vec::new();
        for col in schema.columns() {
            columns.push(format!(
                "{} AS {}",
                qualified(ROOT_ALIAS, col.name()),
                quote(col.name())
            ));
            plan.root_columns.push(col.name().to_owned());
            plan.types.insert(col.name().to_owned(), col.ty());
        }

        let mut aliases = 1;
        plan.attach(graph, schema, None, ROOT_ALIAS, tree, &mut columns, &mut aliases)?;
        plan.columns_sql = columns.join(", ");
        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn attach(
        &mut self,
        graph: &RelationshipGraph,
        owner_schema: &EntitySchema,
        owner: Option<usize>,
        owner_alias: &str,
        nodes: &[LoadNode<'_>],
        columns: &mut Vec<String>,
        aliases: &mut usize,
    ) -> PersistResult<()> {
        for node in nodes {
            let edge = node.edge;
            let target = graph.entity(edge.target())?;
            let local = edge.local_column();

            if edge.cardinality().is_collection() {
                let (parent_expr, link_sql) = match edge.join() {
                    JoinCondition::Columns { remote, .. } => (qualified(ROOT_ALIAS, remote), None),
                    JoinCondition::Secondary {
                        table,
                        secondary_local,
                        secondary_remote,
                        remote,
                        ..
                    } => (
                        qualified(LINK_ALIAS, secondary_local),
                        Some(format!(
                            " INNER JOIN {} AS {} ON {} = {}",
                            quote(table),
                            quote(LINK_ALIAS),
                            qualified(LINK_ALIAS, secondary_remote),
                            qualified(ROOT_ALIAS, remote)
                        )),
                    ),
                };
                self.collections.push(CollectionPlan {
                    owner,
                    relation: edge.name().to_owned(),
                    local: local.to_owned(),
                    local_ty: require_column(owner_schema, local)?.ty(),
                    parent_expr,
                    link_sql,
                    target_pk: target.primary_key().name().to_owned(),
                    plan: SelectPlan::compile(graph, &target, &node.children)?,
                });
                continue;
            }

            let alias = format!("t{aliases}");
            *aliases += 1;
            self.from_sql.push_str(&format!(
                " LEFT OUTER JOIN {} AS {} ON {} = {}",
                quote(target.table()),
                quote(&alias),
                qualified(owner_alias, local),
                qualified(&alias, edge.remote_column())
            ));

            let mut names = Vec::with_capacity(target.columns().len());
            for col in target.columns() {
                columns.push(format!(
                    "{} AS {}",
                    qualified(&alias, col.name()),
                    quote(&nested_name(&alias, col.name()))
                ));
                names.push(col.name().to_owned());
                self.types.insert(nested_name(&alias, col.name()), col.ty());
            }

            let idx = self.nests.len();
            self.nests.push(Nest {
                owner,
                relation: edge.name().to_owned(),
                alias: alias.clone(),
                columns: names,
                pk: target.primary_key().name().to_owned(),
            });
            self.attach(graph, &target, Some(idx), &alias, &node.children, columns, aliases)?;
        }
        Ok(())
    }

    /// `SELECT <列> FROM <表及 JOIN>`
    pub fn sql(&self) -> String {
        format!("SELECT {} FROM {}", self.columns_sql, self.from_sql)
    }

    pub(crate) fn select(&self) -> SqlWriter {
        let mut w = SqlWriter::new(self.sql());
        w.typed(&self.types);
        w
    }

    /// 集合关系的数量（每个都会多一条子查询）
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// 把主语句返回的扁平行还原为嵌套记录，并加载集合关系
    pub(crate) fn load<'a>(
        &'a self,
        session: &'a mut dyn Session,
        rows: Vec<Record>,
    ) -> BoxFuture<'a, PersistResult<Vec<Record>>> {
        Box::pin(async move {
            let mut rows: Vec<Hydrated> = rows.into_iter().map(|r| self.split(r)).collect();
            for collection in &self.collections {
                collection.attach(session, &mut rows).await?;
            }
            Ok(rows.into_iter().map(|r| self.assemble(r)).collect())
        })
    }

    fn split(&self, mut flat: Record) -> Hydrated {
        let mut root = Record::new();
        for col in &self.root_columns {
            root.insert(col.clone(), flat.remove(col).unwrap_or(Json::Null));
        }

        let nests = self
            .nests
            .iter()
            .map(|nest| {
                let mut record = Record::new();
                for col in &nest.columns {
                    let value = flat
                        .remove(&nested_name(&nest.alias, col))
                        .unwrap_or(Json::Null);
                    record.insert(col.clone(), value);
                }
                match record.get(&nest.pk) {
                    None | Some(Json::Null) => None,
                    Some(_) => Some(record),
                }
            })
            .collect();

        Hydrated { root, nests }
    }

    fn assemble(&self, row: Hydrated) -> Record {
        let Hydrated { mut root, mut nests } = row;
        // 子节点下标总大于父节点，倒序折叠即可先完成子树
        for (idx, nest) in self.nests.iter().enumerate().rev() {
            let value = nests
                .get_mut(idx)
                .and_then(Option::take)
                .map(Json::Object)
                .unwrap_or(Json::Null);
            let parent = match nest.owner {
                None => Some(&mut root),
                Some(owner) => nests.get_mut(owner).and_then(Option::as_mut),
            };
            if let Some(parent) = parent {
                parent.insert(nest.relation.clone(), value);
            }
        }
        root
    }
}

/// 拆分后的一行：主记录 + 每个 JOIN 关系的记录
struct Hydrated {
    root: Record,
    nests: Vec<Option<Record>>,
}

impl Hydrated {
    fn owner(&self, owner: Option<usize>) -> Option<&Record> {
        match owner {
            None => Some(&self.root),
            Some(idx) => self.nests.get(idx).and_then(Option::as_ref),
        }
    }

    fn owner_mut(&mut self, owner: Option<usize>) -> Option<&mut Record> {
        match owner {
            None => Some(&mut self.root),
            Some(idx) => self.nests.get_mut(idx).and_then(Option::as_mut),
        }
    }
}

impl CollectionPlan {
    fn statement(&self, keys: Vec<Value>) -> Statement {
        let target_pk = qualified(ROOT_ALIAS, &self.target_pk);
        let mut w = SqlWriter::new(format!(
            "SELECT * FROM (SELECT {cols}, {parent} AS {parent_key}, ROW_NUMBER() OVER \
             (PARTITION BY {parent} ORDER BY {target_pk} DESC) AS {rn} FROM {from}{link} WHERE {parent} IN ",
            cols = self.plan.columns_sql,
            parent = self.parent_expr,
            parent_key = quote(PARENT_KEY),
            rn = quote(ROW_NUMBER),
            from = self.plan.from_sql,
            link = self.link_sql.as_deref().unwrap_or_default(),
        ));
        w.typed(&self.plan.types);
        w.bind_list(keys);
        w.push(&format!(
            ") AS {} WHERE {} <= ",
            quote(PARTITION_ALIAS),
            qualified(PARTITION_ALIAS, ROW_NUMBER)
        ));
        w.bind(Value::Int(DEFAULT_RELATIONSHIP_LOAD_LIMIT));
        w.push(&format!(
            " ORDER BY {}, {}",
            qualified(PARTITION_ALIAS, PARENT_KEY),
            qualified(PARTITION_ALIAS, ROW_NUMBER)
        ));
        let mut stmt = w.finish();
        stmt.result_types.insert(PARENT_KEY.to_owned(), self.local_ty);
        stmt
    }

    async fn attach(&self, session: &mut dyn Session, rows: &mut [Hydrated]) -> PersistResult<()> {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for row in rows.iter() {
            let Some(key) = row.owner(self.owner).and_then(|r| r.get(&self.local)) else {
                continue;
            };
            if key.is_null() || !seen.insert(key.to_string()) {
                continue;
            }
            keys.push(Value::from_json(self.local_ty, key)?);
        }

        let mut groups: HashMap<String, Vec<Json>> = HashMap::new();
        if !keys.is_empty() {
            let flat = session.fetch_all(&self.statement(keys)).await?;
            let parents: Vec<String> = flat
                .iter()
                .map(|r| r.get(PARENT_KEY).map(Json::to_string).unwrap_or_default())
                .collect();
            let children = self.plan.load(session, flat).await?;
            for (parent, child) in parents.into_iter().zip(children) {
                groups.entry(parent).or_default().push(Json::Object(child));
            }
        }

        for row in rows.iter_mut() {
            let Some(owner) = row.owner_mut(self.owner) else {
                continue;
            };
            let key = owner.get(&self.local).map(Json::to_string).unwrap_or_default();
            let items = groups.get(&key).cloned().unwrap_or_default();
            owner.insert(self.relation.clone(), Json::Array(items));
        }
        Ok(())
    }
}

/// 计划缓存：同一 (实体, 预加载名称) 只编译一次
#[derive(Debug)]
pub struct LoadPlanner {
    graph: Arc<RelationshipGraph>,
    cache: DashMap<(String, String), Arc<SelectPlan>>,
    capacity: usize,
}

impl LoadPlanner {
    pub fn new(graph: Arc<RelationshipGraph>) -> Self {
        Self::with_capacity(graph, PLAN_CACHE_CAPACITY)
    }

    pub(crate) fn with_capacity(graph: Arc<RelationshipGraph>, capacity: usize) -> Self {
        Self {
            graph,
            cache: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn graph(&self) -> &Arc<RelationshipGraph> {
        &self.graph
    }

    /// 未知的预加载名称被忽略
    pub fn plan(&self, entity: &str, loads: &[String]) -> PersistResult<Arc<SelectPlan>> {
        let tree = load_tree(&self.graph, entity, loads);
        let key = (entity.to_owned(), tree_signature(&tree));
        if let Some(plan) = self.cache.get(&key) {
            return Ok(Arc::clone(plan.value()));
        }

        let schema = self.graph.entity(entity)?;
        let plan = Arc::new(SelectPlan::compile(&self.graph, &schema, &tree)?);
        debug!(entity, tree = %key.1, sql = %plan.sql(), "compiled load plan");

        if self.cache.len() >= self.capacity {
            // 先取出键再删除，迭代器持有分片读锁
            let victim = self.cache.iter().next().map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.cache.remove(&victim);
            }
        }
        let entry = self.cache.entry(key).or_insert(plan);
        Ok(Arc::clone(entry.value()))
    }

    pub(crate) fn cached(&self) -> usize {
        self.cache.len()
    }
}
