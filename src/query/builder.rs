//! Fluent construction of query trees.
//!
//! Stands in for the external parser in tests and embedders: variables are
//! declared up front, statements are appended in order, and the first
//! problem found is reported by [`AstBuilder::build`].

use crate::query::ast::{Ast, AstNode, AstNodeType, Literal};
use crate::query::errors::{PlanError, Result};
use crate::query::variable::{VariableGenerator, VariableRef};

/// Builds an [`Ast`] rooted at a `Root` node.
#[derive(Default)]
pub struct AstBuilder {
    variables: VariableGenerator,
    body: StatementBuilder,
}

impl AstBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a user variable for use in later statements.
    pub fn declare(&mut self, name: impl Into<String>) -> VariableRef {
        self.variables.declare(name)
    }

    /// Statement list of the top-level query.
    pub fn body(&mut self) -> &mut StatementBuilder {
        &mut self.body
    }

    /// Finishes the tree, surfacing the first recorded error.
    pub fn build(self) -> Result<Ast> {
        let root = self.body.finish(AstNodeType::Root)?;
        Ok(Ast::new(root, self.variables))
    }
}

/// Appends statements to a query block.
#[derive(Default)]
pub struct StatementBuilder {
    statements: Vec<AstNode>,
    error: Option<PlanError>,
}

impl StatementBuilder {
    fn push(&mut self, statement: AstNode) -> &mut Self {
        if self.error.is_none() {
            self.statements.push(statement);
        }
        self
    }

    fn fail(&mut self, context: &'static str, reason: &str) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(PlanError::malformed_ast(context, reason));
        }
        self
    }

    fn finish(self, node_type: AstNodeType) -> Result<AstNode> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(AstNode::with_members(node_type, self.statements)),
        }
    }

    /// `FOR var IN collection`.
    pub fn for_collection(&mut self, var: &VariableRef, collection: impl Into<String>) -> &mut Self {
        self.push(AstNode::with_members(
            AstNodeType::For,
            vec![AstNode::declaration(var), AstNode::collection(collection)],
        ))
    }

    /// `FOR var IN expr`.
    pub fn for_in(&mut self, var: &VariableRef, expr: AstNode) -> &mut Self {
        self.push(AstNode::with_members(
            AstNodeType::For,
            vec![AstNode::declaration(var), expr],
        ))
    }

    /// `FILTER expr`.
    pub fn filter(&mut self, expr: AstNode) -> &mut Self {
        self.push(AstNode::with_members(AstNodeType::Filter, vec![expr]))
    }

    /// `LET var = expr`.
    pub fn let_(&mut self, var: &VariableRef, expr: AstNode) -> &mut Self {
        self.push(AstNode::with_members(
            AstNodeType::Let,
            vec![AstNode::declaration(var), expr],
        ))
    }

    /// `LET var = ( subquery )`, with the nested statements supplied by `build`.
    pub fn let_subquery<F>(&mut self, var: &VariableRef, build: F) -> &mut Self
    where
        F: FnOnce(&mut StatementBuilder),
    {
        if self.error.is_some() {
            return self;
        }
        let mut nested = StatementBuilder::default();
        build(&mut nested);
        match nested.finish(AstNodeType::Subquery) {
            Ok(subquery) => self.let_(var, subquery),
            Err(err) => {
                self.error = Some(err);
                self
            }
        }
    }

    /// `SORT key [ASC|DESC], ...`; `true` means ascending.
    pub fn sort<I>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = (AstNode, bool)>,
    {
        let elements: Vec<AstNode> = keys
            .into_iter()
            .map(|(expr, ascending)| AstNode {
                value: Some(Literal::Bool(ascending)),
                ..AstNode::with_members(AstNodeType::SortElement, vec![expr])
            })
            .collect();
        if elements.is_empty() {
            return self.fail("SORT", "sort requires at least one key");
        }
        self.push(AstNode::with_members(
            AstNodeType::Sort,
            vec![AstNode::list(elements)],
        ))
    }

    /// `COLLECT out = expr, ... [INTO into]`.
    pub fn collect<'v, I>(&mut self, groups: I, into: Option<&VariableRef>) -> &mut Self
    where
        I: IntoIterator<Item = (&'v VariableRef, AstNode)>,
    {
        let assigns: Vec<AstNode> = groups
            .into_iter()
            .map(|(out, expr)| {
                AstNode::with_members(AstNodeType::Assign, vec![AstNode::declaration(out), expr])
            })
            .collect();
        let mut members = vec![AstNode::list(assigns)];
        if let Some(into) = into {
            members.push(AstNode::declaration(into));
        }
        self.push(AstNode::with_members(AstNodeType::Collect, members))
    }

    /// `LIMIT offset, count`.
    pub fn limit(&mut self, offset: i64, count: i64) -> &mut Self {
        if offset < 0 || count < 0 {
            return self.fail("LIMIT", "offset and count must not be negative");
        }
        self.push(AstNode::with_members(
            AstNodeType::Limit,
            vec![AstNode::value(offset), AstNode::value(count)],
        ))
    }

    /// `RETURN expr`.
    pub fn return_(&mut self, expr: AstNode) -> &mut Self {
        self.push(AstNode::with_members(AstNodeType::Return, vec![expr]))
    }

    /// `REMOVE expr IN collection [OPTIONS {...}]`.
    pub fn remove(
        &mut self,
        expr: AstNode,
        collection: impl Into<String>,
        options: Option<AstNode>,
    ) -> &mut Self {
        self.push(modification(AstNodeType::Remove, options, collection, expr, None))
    }

    /// `INSERT expr IN collection [OPTIONS {...}]`.
    pub fn insert(
        &mut self,
        expr: AstNode,
        collection: impl Into<String>,
        options: Option<AstNode>,
    ) -> &mut Self {
        self.push(modification(AstNodeType::Insert, options, collection, expr, None))
    }

    /// `UPDATE [key WITH] doc IN collection [OPTIONS {...}]`.
    pub fn update(
        &mut self,
        doc: AstNode,
        key: Option<AstNode>,
        collection: impl Into<String>,
        options: Option<AstNode>,
    ) -> &mut Self {
        self.push(modification(AstNodeType::Update, options, collection, doc, key))
    }

    /// `REPLACE [key WITH] doc IN collection [OPTIONS {...}]`.
    pub fn replace(
        &mut self,
        doc: AstNode,
        key: Option<AstNode>,
        collection: impl Into<String>,
        options: Option<AstNode>,
    ) -> &mut Self {
        self.push(modification(AstNodeType::Replace, options, collection, doc, key))
    }

    /// Placeholder statement skipped by lowering.
    pub fn nop(&mut self) -> &mut Self {
        self.push(AstNode::new(AstNodeType::Nop))
    }
}

fn modification(
    node_type: AstNodeType,
    options: Option<AstNode>,
    collection: impl Into<String>,
    expr: AstNode,
    key: Option<AstNode>,
) -> AstNode {
    let mut members = vec![
        options.unwrap_or_else(|| AstNode::new(AstNodeType::Nop)),
        AstNode::collection(collection),
        expr,
    ];
    members.extend(key);
    AstNode::with_members(node_type, members)
}
