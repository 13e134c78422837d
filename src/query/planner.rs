//! Lowering of a parsed query into an execution plan.
//!
//! Each statement of a query block becomes one or more pipeline stages
//! appended to the stage produced by the previous statement. Operands that
//! are not plain variable references are hoisted into calculation stages
//! bound to fresh temporaries, so every consuming stage reads variables only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::ast::{Ast, AstNode, AstNodeType};
use crate::query::errors::{PlanError, Result};
use crate::query::expression::Expression;
use crate::query::metadata::{AccessMode, CollectionCatalog};
use crate::query::node::{AggregateVariable, ModificationOptions, NodeKind, NodeType, SortElement};
use crate::query::plan::ExecutionPlan;
use crate::query::variable::{VariableGenerator, VariableRef};
use crate::types::NodeId;

/// Planner switches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Run the linkage checker after lowering and after every surgery call on
    /// the produced plan.
    pub verify_linkage: bool,
    /// Compute liveness before handing the plan out.
    pub compute_var_usage: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            verify_linkage: false,
            compute_var_usage: true,
        }
    }
}

/// Turns query trees into execution plans.
pub struct Planner {
    catalog: Arc<dyn CollectionCatalog>,
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner resolving collections through `catalog`.
    pub fn new(config: PlannerConfig, catalog: Arc<dyn CollectionCatalog>) -> Self {
        Self { catalog, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Lowers `ast` into a new plan.
    ///
    /// Temporaries for hoisted expressions are minted from the query's own
    /// variable generator. On error the partially built plan is dropped.
    pub fn plan(&self, ast: &mut Ast) -> Result<ExecutionPlan> {
        if ast.root.node_type != AstNodeType::Root {
            return Err(PlanError::malformed_ast(
                "query",
                format!("expected root node, found {}", ast.root.node_type),
            ));
        }
        let mut plan = ExecutionPlan::new();
        plan.set_verify_linkage(self.config.verify_linkage);

        let mut lowering = Lowering {
            plan: &mut plan,
            variables: &mut ast.variables,
            catalog: self.catalog.as_ref(),
        };
        let root = lowering.block(&ast.root)?;
        plan.set_root(root)?;

        if self.config.verify_linkage {
            plan.check_linkage();
        }
        if self.config.compute_var_usage {
            plan.find_var_usage()?;
        }
        debug!(nodes = plan.len(), root = %root, "planner.plan.built");
        Ok(plan)
    }
}

struct Lowering<'a> {
    plan: &'a mut ExecutionPlan,
    variables: &'a mut VariableGenerator,
    catalog: &'a dyn CollectionCatalog,
}

impl Lowering<'_> {
    /// Lowers a statement list, starting from a fresh singleton. Returns the
    /// last stage of the block.
    fn block(&mut self, node: &AstNode) -> Result<NodeId> {
        let mut previous = self.plan.create_node(NodeKind::Singleton)?;
        for member in &node.members {
            previous = match member.node_type {
                AstNodeType::Nop => continue,
                AstNodeType::For => self.lower_for(previous, member)?,
                AstNodeType::Filter => self.lower_filter(previous, member)?,
                AstNodeType::Let => self.lower_let(previous, member)?,
                AstNodeType::Sort => self.lower_sort(previous, member)?,
                AstNodeType::Collect => self.lower_collect(previous, member)?,
                AstNodeType::Limit => self.lower_limit(previous, member)?,
                AstNodeType::Return => self.lower_return(previous, member)?,
                AstNodeType::Remove => self.lower_remove(previous, member)?,
                AstNodeType::Insert => self.lower_insert(previous, member)?,
                AstNodeType::Update | AstNodeType::Replace => {
                    self.lower_update_or_replace(previous, member)?
                }
                other => return Err(PlanError::TypeNotHandled { node_type: other }),
            };
            debug!(clause = %member.node_type, node = %previous, "planner.lower.clause");
        }
        Ok(previous)
    }

    fn lower_for(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 2, 2, "FOR")?;
        let out_variable = declared_variable(node.member(0), "FOR")?;
        let expression = required_member(node, 1, "FOR")?;
        let kind = if expression.node_type == AstNodeType::Collection {
            let collection =
                self.resolve_collection(expression, AccessMode::Read, NodeType::EnumerateCollection)?;
            NodeKind::EnumerateCollection {
                collection,
                out_variable,
            }
        } else {
            let in_variable = self.operand(&mut previous, expression)?;
            NodeKind::EnumerateList {
                in_variable,
                out_variable,
            }
        };
        self.attach(previous, kind)
    }

    fn lower_filter(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 1, 1, "FILTER")?;
        let in_variable = self.operand(&mut previous, required_member(node, 0, "FILTER")?)?;
        self.attach(previous, NodeKind::Filter { in_variable })
    }

    fn lower_let(&mut self, previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 2, 2, "LET")?;
        let out_variable = declared_variable(node.member(0), "LET")?;
        let expression = required_member(node, 1, "LET")?;
        let kind = if expression.node_type == AstNodeType::Subquery {
            let subquery = self.block(expression)?;
            NodeKind::Subquery {
                subquery,
                out_variable,
            }
        } else {
            NodeKind::Calculation {
                expression: Expression::new(expression.clone()),
                out_variable,
            }
        };
        self.attach(previous, kind)
    }

    fn lower_sort(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 1, 1, "SORT")?;
        let list = typed_member(node, 0, AstNodeType::List, "SORT")?;
        if list.members.is_empty() {
            return Err(PlanError::malformed_ast("SORT", "no sort elements"));
        }
        let mut elements = Vec::with_capacity(list.members.len());
        for element in &list.members {
            if element.node_type != AstNodeType::SortElement {
                return Err(PlanError::malformed_ast(
                    "SORT",
                    format!("expected sort_element, found {}", element.node_type),
                ));
            }
            expect_members(element, 1, 1, "SORT element")?;
            let ascending = element.value.as_ref().map_or(true, |v| v.to_boolean());
            let variable = self.operand(&mut previous, required_member(element, 0, "SORT element")?)?;
            elements.push(SortElement {
                variable,
                ascending,
            });
        }
        self.attach(
            previous,
            NodeKind::Sort {
                elements,
                stable: false,
            },
        )
    }

    fn lower_collect(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 1, 2, "COLLECT")?;
        let list = typed_member(node, 0, AstNodeType::List, "COLLECT")?;
        let mut aggregates = Vec::with_capacity(list.members.len());
        let mut elements = Vec::with_capacity(list.members.len());
        for assign in &list.members {
            if assign.node_type != AstNodeType::Assign {
                return Err(PlanError::malformed_ast(
                    "COLLECT",
                    format!("expected assign, found {}", assign.node_type),
                ));
            }
            expect_members(assign, 2, 2, "COLLECT assignment")?;
            let out_variable = declared_variable(assign.member(0), "COLLECT assignment")?;
            let in_variable =
                self.operand(&mut previous, required_member(assign, 1, "COLLECT assignment")?)?;
            elements.push(SortElement {
                variable: VariableRef::clone(&in_variable),
                ascending: true,
            });
            aggregates.push(AggregateVariable {
                out_variable,
                in_variable,
            });
        }

        // Grouping relies on equal keys being adjacent.
        previous = self.attach(
            previous,
            NodeKind::Sort {
                elements,
                stable: true,
            },
        )?;

        let (out_variable, keep_variables) = match node.member(1) {
            Some(into) => (
                Some(declared_variable(Some(into), "COLLECT INTO")?),
                self.variables.user_variables(),
            ),
            None => (None, Vec::new()),
        };
        self.attach(
            previous,
            NodeKind::Aggregate {
                aggregates,
                out_variable,
                keep_variables,
            },
        )
    }

    fn lower_limit(&mut self, previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 2, 2, "LIMIT")?;
        let offset = limit_bound(required_member(node, 0, "LIMIT")?, "offset")?;
        let limit = limit_bound(required_member(node, 1, "LIMIT")?, "count")?;
        self.attach(previous, NodeKind::Limit { offset, limit })
    }

    fn lower_return(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 1, 1, "RETURN")?;
        let in_variable = self.operand(&mut previous, required_member(node, 0, "RETURN")?)?;
        self.attach(previous, NodeKind::Return { in_variable })
    }

    fn lower_remove(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 3, 3, "REMOVE")?;
        let options = create_options(node.member(0))?;
        let collection = self.resolve_collection(
            required_member(node, 1, "REMOVE")?,
            AccessMode::Write,
            NodeType::Remove,
        )?;
        let in_variable = self.operand(&mut previous, required_member(node, 2, "REMOVE")?)?;
        self.attach(
            previous,
            NodeKind::Remove {
                collection,
                options,
                in_variable,
            },
        )
    }

    fn lower_insert(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        expect_members(node, 3, 3, "INSERT")?;
        let options = create_options(node.member(0))?;
        let collection = self.resolve_collection(
            required_member(node, 1, "INSERT")?,
            AccessMode::Write,
            NodeType::Insert,
        )?;
        let in_variable = self.operand(&mut previous, required_member(node, 2, "INSERT")?)?;
        self.attach(
            previous,
            NodeKind::Insert {
                collection,
                options,
                in_variable,
            },
        )
    }

    fn lower_update_or_replace(&mut self, mut previous: NodeId, node: &AstNode) -> Result<NodeId> {
        let (context, node_type) = match node.node_type {
            AstNodeType::Update => ("UPDATE", NodeType::Update),
            _ => ("REPLACE", NodeType::Replace),
        };
        expect_members(node, 3, 4, context)?;
        let options = create_options(node.member(0))?;
        let collection = self.resolve_collection(
            required_member(node, 1, context)?,
            AccessMode::Write,
            node_type,
        )?;
        // The key is hoisted before the document.
        let in_key_variable = match node.member(3) {
            Some(key) => Some(self.operand(&mut previous, key)?),
            None => None,
        };
        let in_doc_variable = self.operand(&mut previous, required_member(node, 2, context)?)?;
        let kind = if node_type == NodeType::Update {
            NodeKind::Update {
                collection,
                options,
                in_doc_variable,
                in_key_variable,
            }
        } else {
            NodeKind::Replace {
                collection,
                options,
                in_doc_variable,
                in_key_variable,
            }
        };
        self.attach(previous, kind)
    }

    /// Returns the variable holding `expression`, hoisting it into a
    /// calculation appended after `previous` unless it is already a reference.
    fn operand(&mut self, previous: &mut NodeId, expression: &AstNode) -> Result<VariableRef> {
        if expression.node_type == AstNodeType::Reference {
            return expression.variable.clone().ok_or_else(|| {
                PlanError::malformed_ast("reference", "reference without a variable")
            });
        }
        let out_variable = self.variables.create_temporary();
        let calc = self.attach(
            *previous,
            NodeKind::Calculation {
                expression: Expression::new(expression.clone()),
                out_variable: VariableRef::clone(&out_variable),
            },
        )?;
        debug!(node = %calc, variable = %out_variable, "planner.hoist");
        *previous = calc;
        Ok(out_variable)
    }

    fn attach(&mut self, previous: NodeId, kind: NodeKind) -> Result<NodeId> {
        let id = self.plan.create_node(kind)?;
        self.plan.add_dependency(previous, id)
    }

    fn resolve_collection(
        &mut self,
        node: &AstNode,
        mode: AccessMode,
        consumer: NodeType,
    ) -> Result<String> {
        let name = match (node.node_type, node.string_value()) {
            (AstNodeType::Collection, Some(name)) => name,
            _ => {
                return Err(PlanError::malformed_ast(
                    consumer.as_str(),
                    format!("expected collection name, found {}", node.node_type),
                ))
            }
        };
        let collection = self
            .catalog
            .resolve_collection(name, mode)
            .map_err(|err| match err {
                PlanError::UnknownCollection { name, .. } => PlanError::UnknownCollection {
                    name,
                    context: consumer.as_str(),
                },
                PlanError::ReadOnlyCollection { name, .. } => PlanError::ReadOnlyCollection {
                    name,
                    context: consumer.as_str(),
                },
                other => other,
            })?;
        self.plan.collections_mut().add(collection.name.clone(), mode);
        Ok(collection.name)
    }
}

/// Reads modification flags from an options object. Anything other than an
/// object literal yields the defaults; unknown keys are ignored.
fn create_options(node: Option<&AstNode>) -> Result<ModificationOptions> {
    let mut options = ModificationOptions::default();
    let Some(node) = node.filter(|n| n.node_type == AstNodeType::Array) else {
        return Ok(options);
    };
    for element in &node.members {
        if element.node_type != AstNodeType::ArrayElement {
            continue;
        }
        let (Some(name), Some(value)) = (element.string_value(), element.member(0)) else {
            continue;
        };
        if !value.is_constant() {
            return Err(PlanError::malformed_ast(
                "options",
                format!("option '{name}' must be a constant"),
            ));
        }
        let flag = value.value.as_ref().map_or(false, |lit| lit.to_boolean());
        match name {
            "waitForSync" => options.wait_for_sync = flag,
            "ignoreErrors" => options.ignore_errors = flag,
            "keepNull" => options.null_means_remove = !flag,
            _ => {}
        }
    }
    Ok(options)
}

fn limit_bound(node: &AstNode, what: &str) -> Result<u64> {
    let value = match (node.node_type, node.value.as_ref()) {
        (AstNodeType::Value, Some(lit)) => lit.as_int(),
        _ => None,
    };
    value
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| {
            PlanError::malformed_ast("LIMIT", format!("{what} must be a non-negative integer"))
        })
}

fn expect_members(node: &AstNode, min: usize, max: usize, context: &'static str) -> Result<()> {
    let n = node.num_members();
    if n < min || n > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min}..={max}")
        };
        return Err(PlanError::malformed_ast(
            context,
            format!("expected {expected} members, found {n}"),
        ));
    }
    Ok(())
}

fn required_member<'n>(node: &'n AstNode, idx: usize, context: &'static str) -> Result<&'n AstNode> {
    node.member(idx)
        .ok_or_else(|| PlanError::malformed_ast(context, format!("missing member {idx}")))
}

fn typed_member<'n>(
    node: &'n AstNode,
    idx: usize,
    expected: AstNodeType,
    context: &'static str,
) -> Result<&'n AstNode> {
    let member = required_member(node, idx, context)?;
    if member.node_type != expected {
        return Err(PlanError::malformed_ast(
            context,
            format!("expected {expected}, found {}", member.node_type),
        ));
    }
    Ok(member)
}

fn declared_variable(node: Option<&AstNode>, context: &'static str) -> Result<VariableRef> {
    match node {
        Some(AstNode {
            node_type: AstNodeType::Variable,
            variable: Some(var),
            ..
        }) => Ok(VariableRef::clone(var)),
        Some(other) => Err(PlanError::malformed_ast(
            context,
            format!("expected variable, found {}", other.node_type),
        )),
        None => Err(PlanError::malformed_ast(context, "missing variable")),
    }
}
