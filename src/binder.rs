//! Path binding.
//!
//! The [`Binder`] owns the [`QueryGraph`] while a query is being parsed. It
//! resolves aliases and dotted paths against the schema, creates from-items
//! for relationship traversals, and allocates parameters. A to-one traversal
//! from the same parent in the same query block always yields the same
//! from-item; the interning table is keyed on `(query, parent, field)`.

use crate::ast::{
    ArgExpr, ArgSource, BinOp, CollectionRef, ColumnRef, Expr, FromId, FromItem, JoinExpr,
    JoinKind, JoinSemantics, Literal, PathExpr, QueryBody, QueryGraph, QueryId,
};
use crate::error::ErrorReason;
use crate::schema::{EntityMetadata, FieldKind, SchemaResolver, Table};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// One resolved navigation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Column(ColumnRef),
    Entity(FromId),
    Collection(CollectionRef),
}

impl Bound {
    pub fn into_expr(self) -> Expr {
        match self {
            Bound::Column(c) => Expr::Column(c),
            Bound::Entity(from) => Expr::Path(PathExpr::Entity(from)),
            Bound::Collection(c) => Expr::Path(PathExpr::Collection(c)),
        }
    }
}

pub struct Binder<'a> {
    schema: &'a dyn SchemaResolver,
    alias_prefix: String,
    graph: QueryGraph,
    paths: HashMap<(QueryId, FromId, String), FromId>,
    next_alias: usize,
    /// Lower-cased identifiers of the query text that generated aliases
    /// must avoid.
    reserved: HashSet<String>,
    /// `Some(true)` once a named parameter was seen, `Some(false)` for positional.
    named_parameters: Option<bool>,
}

impl<'a> Binder<'a> {
    pub fn new(schema: &'a dyn SchemaResolver, alias_prefix: &str) -> Self {
        Binder {
            schema,
            alias_prefix: alias_prefix.to_string(),
            graph: QueryGraph::default(),
            paths: HashMap::new(),
            next_alias: 0,
            reserved: HashSet::new(),
            named_parameters: None,
        }
    }

    pub fn graph(&self) -> &QueryGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut QueryGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> QueryGraph {
        self.graph
    }

    pub fn schema(&self) -> &dyn SchemaResolver {
        self.schema
    }

    pub fn new_query(&mut self, parent: Option<QueryId>, body: QueryBody) -> QueryId {
        let id = QueryId(self.graph.queries.len());
        self.graph
            .queries
            .push(crate::ast::AbstractQuery::new(id, parent, body));
        id
    }

    pub fn lookup_entity(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.schema.lookup_schema(name)
    }

    fn resolve_entity(&self, name: &str) -> Result<Arc<EntityMetadata>, ErrorReason> {
        self.lookup_entity(name)
            .ok_or_else(|| ErrorReason::UnknownEntity {
                name: name.to_string(),
            })
    }

    /// Find an alias in `query` or any enclosing block, innermost first.
    pub fn lookup_alias(&self, query: QueryId, name: &str) -> Option<FromId> {
        let mut current = Some(query);
        while let Some(q) = current {
            let found = self
                .graph
                .live_items(q)
                .find(|item| item.alias.eq_ignore_ascii_case(name));
            if let Some(item) = found {
                return Some(item.id);
            }
            current = self.graph.query(q).parent;
        }
        None
    }

    /// First from-item of `query`, used for unqualified field names.
    pub fn first_item(&self, query: QueryId) -> Option<FromId> {
        self.graph.query(query).from_list.first().copied()
    }

    /// Keep generated aliases clear of `names`, including user aliases that
    /// are only declared later in the text, such as inside a sub-select.
    pub fn reserve_aliases<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.reserved
            .extend(names.into_iter().map(|n| n.to_ascii_lowercase()));
    }

    pub fn generate_alias(&mut self) -> String {
        loop {
            let alias = format!("{}{}", self.alias_prefix, self.next_alias);
            self.next_alias += 1;
            let taken = self.reserved.contains(&alias.to_ascii_lowercase())
                || self
                    .graph
                    .items
                    .iter()
                    .any(|item| item.alias.eq_ignore_ascii_case(&alias));
            if !taken {
                return alias;
            }
        }
    }

    fn check_alias_free(&self, query: QueryId, alias: &str) -> Result<(), ErrorReason> {
        if self
            .graph
            .live_items(query)
            .any(|item| item.alias.eq_ignore_ascii_case(alias))
        {
            return Err(ErrorReason::DuplicateAlias {
                alias: alias.to_string(),
            });
        }
        Ok(())
    }

    fn push_item(
        &mut self,
        query: QueryId,
        alias: String,
        table: Table,
        entity: Option<Arc<EntityMetadata>>,
        join: Option<JoinExpr>,
        semantics: JoinSemantics,
    ) -> FromId {
        let id = FromId(self.graph.items.len());
        trace!(alias = %alias, table = %table.name, "adding from-item");
        self.graph.items.push(FromItem {
            id,
            sql_name: alias.clone(),
            alias,
            table,
            entity,
            owner: query,
            join,
            semantics,
            fetch: false,
        });
        self.graph.query_mut(query).from_list.push(id);
        id
    }

    /// Declare an entity root such as `Order o`. Bulk statements qualify
    /// their target by table name.
    pub fn declare_root(
        &mut self,
        query: QueryId,
        entity: Arc<EntityMetadata>,
        alias: String,
        bulk: bool,
    ) -> Result<FromId, ErrorReason> {
        self.check_alias_free(query, &alias)?;
        let table = entity.table.clone();
        let id = self.push_item(
            query,
            alias,
            table.clone(),
            Some(entity.clone()),
            None,
            JoinSemantics::Unknown,
        );
        if bulk {
            self.graph.item_mut(id).sql_name = table.name;
        }
        if let Some(filter) = discriminator_filter(id, &entity) {
            self.graph.query_mut(query).filters.push(filter);
        }
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_joined(
        &mut self,
        query: QueryId,
        alias: String,
        entity: Option<Arc<EntityMetadata>>,
        table: Table,
        parent: FromId,
        link: Vec<(String, String)>,
        kind: JoinKind,
        semantics: JoinSemantics,
    ) -> FromId {
        let target = FromId(self.graph.items.len());
        let extra = entity
            .as_ref()
            .and_then(|e| discriminator_filter(target, e))
            .map(Box::new);
        let join = JoinExpr {
            parent,
            target,
            link,
            kind,
            extra,
        };
        self.push_item(query, alias, table, entity, Some(join), semantics)
    }

    fn item_entity(&self, from: FromId, field: &str) -> Result<Arc<EntityMetadata>, ErrorReason> {
        let item = self.graph.item(from);
        item.entity.clone().ok_or_else(|| ErrorReason::NotNavigable {
            path: format!("{}.{}", item.alias, field),
        })
    }

    fn field_of(entity: &EntityMetadata, field: &str) -> Result<FieldKind, ErrorReason> {
        entity
            .field(field)
            .cloned()
            .ok_or_else(|| ErrorReason::UnknownField {
                entity: entity.name.clone(),
                field: field.to_string(),
            })
    }

    /// Resolve `parent.field` inside an expression. To-one relationships
    /// are joined (or reuse an earlier join of the same path), collections
    /// stay unjoined.
    pub fn navigate(
        &mut self,
        query: QueryId,
        parent: FromId,
        field: &str,
        semantics: JoinSemantics,
    ) -> Result<Bound, ErrorReason> {
        let entity = self.item_entity(parent, field)?;
        match Self::field_of(&entity, field)? {
            FieldKind::Column { column } => Ok(Bound::Column(ColumnRef::new(parent, &column))),
            FieldKind::ManyToOne { target, columns } => self
                .join_to_one(query, parent, &entity, field, &target, &columns, semantics, None)
                .map(Bound::Entity),
            kind => self
                .collection(parent, &entity, field, &kind)
                .map(Bound::Collection),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn join_to_one(
        &mut self,
        query: QueryId,
        parent: FromId,
        entity: &EntityMetadata,
        field: &str,
        target: &str,
        columns: &[String],
        semantics: JoinSemantics,
        alias: Option<String>,
    ) -> Result<FromId, ErrorReason> {
        let key = (query, parent, field.to_string());
        if alias.is_none() {
            if let Some(existing) = self.paths.get(&key) {
                return Ok(*existing);
            }
        }

        let target_entity = self.resolve_entity(target)?;
        let keys = target_entity.id_columns();
        if keys.is_empty() || keys.len() != columns.len() {
            return Err(ErrorReason::SchemaMismatch {
                entity: entity.name.clone(),
                field: field.to_string(),
            });
        }
        let link = columns.iter().cloned().zip(keys).collect();
        let alias = match alias {
            Some(alias) => alias,
            None => self.generate_alias(),
        };
        let table = target_entity.table.clone();
        let id = self.add_joined(
            query,
            alias,
            Some(target_entity),
            table,
            parent,
            link,
            JoinKind::ToOne,
            semantics,
        );
        self.paths.entry(key).or_insert(id);
        Ok(id)
    }

    /// Declare the last step of a FROM path (`JOIN o.items i`,
    /// `IN(o.items) i`, `o.customer c`). Collections get their own
    /// from-item here, unlike in expressions.
    pub fn declare_path(
        &mut self,
        query: QueryId,
        parent: FromId,
        field: &str,
        alias: String,
        semantics: JoinSemantics,
    ) -> Result<FromId, ErrorReason> {
        self.check_alias_free(query, &alias)?;
        let entity = self.item_entity(parent, field)?;
        let owner_keys = entity.id_columns();
        let mismatch = || ErrorReason::SchemaMismatch {
            entity: entity.name.clone(),
            field: field.to_string(),
        };

        match Self::field_of(&entity, field)? {
            FieldKind::Column { .. } => Err(ErrorReason::NotAnEntity {
                path: format!("{}.{}", self.graph.item(parent).alias, field),
            }),
            FieldKind::ManyToOne { target, columns } => self.join_to_one(
                query,
                parent,
                &entity,
                field,
                &target,
                &columns,
                semantics,
                Some(alias),
            ),
            FieldKind::OneToMany { target, columns } => {
                let target_entity = self.resolve_entity(&target)?;
                if owner_keys.is_empty() || owner_keys.len() != columns.len() {
                    return Err(mismatch());
                }
                let link = owner_keys.into_iter().zip(columns).collect();
                let table = target_entity.table.clone();
                Ok(self.add_joined(
                    query,
                    alias,
                    Some(target_entity),
                    table,
                    parent,
                    link,
                    JoinKind::ToMany,
                    semantics,
                ))
            }
            FieldKind::ManyToMany {
                target,
                association,
                source_columns,
                target_columns,
            } => {
                let target_entity = self.resolve_entity(&target)?;
                let target_keys = target_entity.id_columns();
                if owner_keys.is_empty()
                    || owner_keys.len() != source_columns.len()
                    || target_keys.len() != target_columns.len()
                {
                    return Err(mismatch());
                }
                let link_alias = self.generate_alias();
                let link_item = self.add_joined(
                    query,
                    link_alias,
                    None,
                    association,
                    parent,
                    owner_keys.into_iter().zip(source_columns).collect(),
                    JoinKind::ToMany,
                    semantics,
                );
                let table = target_entity.table.clone();
                Ok(self.add_joined(
                    query,
                    alias,
                    Some(target_entity),
                    table,
                    link_item,
                    target_columns.into_iter().zip(target_keys).collect(),
                    JoinKind::ToOne,
                    semantics,
                ))
            }
        }
    }

    fn collection(
        &mut self,
        parent: FromId,
        entity: &EntityMetadata,
        field: &str,
        kind: &FieldKind,
    ) -> Result<CollectionRef, ErrorReason> {
        let owner_keys: Vec<ColumnRef> = entity
            .id_columns()
            .iter()
            .map(|c| ColumnRef::new(parent, c))
            .collect();
        let path = format!("{}.{}", self.graph.item(parent).alias, field);

        let (table, link_columns, element_keys, element_entity) = match kind {
            FieldKind::OneToMany { target, columns } => {
                let target_entity = self.resolve_entity(target)?;
                (
                    target_entity.table.clone(),
                    columns.clone(),
                    target_entity.id_columns(),
                    target.clone(),
                )
            }
            FieldKind::ManyToMany {
                target,
                association,
                source_columns,
                target_columns,
            } => {
                self.resolve_entity(target)?;
                (
                    association.clone(),
                    source_columns.clone(),
                    target_columns.clone(),
                    target.clone(),
                )
            }
            _ => return Err(ErrorReason::NotNavigable { path }),
        };
        if owner_keys.is_empty() || owner_keys.len() != link_columns.len() {
            return Err(ErrorReason::SchemaMismatch {
                entity: entity.name.clone(),
                field: field.to_string(),
            });
        }

        if !self.graph.correlated_tables.contains(&table) {
            self.graph.correlated_tables.push(table.clone());
        }
        let alias = self.generate_alias();
        Ok(CollectionRef {
            path,
            owner_keys,
            table,
            alias,
            link_columns,
            element_keys,
            element_entity,
        })
    }

    /// Identity columns of the entity bound to `from`.
    pub fn entity_keys(&self, from: FromId) -> Vec<ColumnRef> {
        self.graph
            .item(from)
            .id_columns()
            .iter()
            .map(|c| ColumnRef::new(from, c))
            .collect()
    }

    /// The join expressed by `navigated = root`, when `navigated` is a to-one
    /// traversal and `root` an unjoined item of `query` of the same entity.
    pub fn join_for_equality(&self, query: QueryId, left: FromId, right: FromId) -> Option<JoinExpr> {
        let as_join = |nav: FromId, root: FromId| -> Option<JoinExpr> {
            let nav_item = self.graph.item(nav);
            let root_item = self.graph.item(root);
            let join = nav_item.join.as_ref()?;
            if join.kind != JoinKind::ToOne
                || join.extra.is_some()
                || nav_item.fetch
                || root_item.owner != query
                || root_item.join.is_some()
                || root_item.entity_name() != nav_item.entity_name()
                || join.parent == root
                || nav == root
            {
                return None;
            }
            Some(JoinExpr {
                parent: join.parent,
                target: root,
                link: join.link.clone(),
                kind: JoinKind::ToOne,
                extra: None,
            })
        };
        as_join(left, right).or_else(|| as_join(right, left))
    }

    /// Register a parameter, reusing the slot of an earlier identical one.
    pub fn argument(&mut self, source: ArgSource) -> Result<usize, ErrorReason> {
        let named = matches!(source, ArgSource::Named(_));
        match self.named_parameters {
            Some(seen) if seen != named => return Err(ErrorReason::MixedParameters),
            _ => self.named_parameters = Some(named),
        }
        if let Some(index) = self.graph.arguments.iter().position(|a| a.source == source) {
            return Ok(index);
        }
        self.graph.arguments.push(ArgExpr {
            source,
            sql_ordinals: Vec::new(),
        });
        Ok(self.graph.arguments.len() - 1)
    }

    pub fn mark_fetch(&mut self, from: FromId) {
        self.graph.item_mut(from).fetch = true;
    }

    /// Lower an expression used as a single value: an entity becomes its
    /// (single) identity column.
    pub fn to_scalar(&self, expr: Expr) -> Result<Expr, ErrorReason> {
        match expr {
            Expr::Path(PathExpr::Entity(from)) => {
                let mut keys = self.entity_keys(from);
                if keys.len() != 1 {
                    return Err(ErrorReason::CompositeIdentity {
                        entity: self.graph.item(from).entity_name().to_string(),
                    });
                }
                Ok(Expr::Column(keys.remove(0)))
            }
            Expr::Path(PathExpr::Collection(c)) => {
                Err(ErrorReason::CollectionNotAllowed { path: c.path })
            }
            Expr::LoadEntity { .. } => Err(ErrorReason::ObjectOutsideSelect),
            other => Ok(other),
        }
    }

    /// Lower an expression to the list of values it stands for: every
    /// identity column for an entity, the expression itself otherwise.
    pub fn to_values(&self, expr: Expr) -> Result<Vec<Expr>, ErrorReason> {
        match expr {
            Expr::Path(PathExpr::Entity(from)) => Ok(self
                .entity_keys(from)
                .into_iter()
                .map(Expr::Column)
                .collect()),
            other => Ok(vec![self.to_scalar(other)?]),
        }
    }
}

fn discriminator_filter(from: FromId, entity: &EntityMetadata) -> Option<Expr> {
    let discriminator = entity.discriminator.as_ref()?;
    Some(Expr::binary(
        BinOp::Equal,
        Expr::column(from, &discriminator.column),
        Expr::Literal(Literal::String(quote_string(&discriminator.value))),
    ))
}

/// Quote a value as an SQL string literal.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
