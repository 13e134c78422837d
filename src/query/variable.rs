//! Variable identities shared by the AST and the plan graph.
//!
//! A variable is minted once per binding site and then only referenced: plan
//! nodes hold [`VariableRef`] handles, and every comparison goes through the
//! numeric id so that handles reconstructed from a serialized document compare
//! equal to the originals.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::VariableId;

/// Shared handle to an immutable variable.
pub type VariableRef = Arc<Variable>;

/// A named value binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variable {
    /// Query-unique identifier.
    pub id: VariableId,
    /// Name as written by the user, or a numeric string for temporaries.
    pub name: String,
}

impl Variable {
    /// Creates a variable with the given id and name.
    pub fn new(id: VariableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Returns false for temporaries introduced by the planner.
    pub fn is_user_defined(&self) -> bool {
        !self
            .name
            .chars()
            .next()
            .map_or(true, |first| first.is_ascii_digit())
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Mints variables for one query.
///
/// The parser declares user variables through [`VariableGenerator::declare`];
/// lowering asks for hoisting temporaries through
/// [`VariableGenerator::create_temporary`]. Both draw from the same id counter.
#[derive(Clone, Debug, Default)]
pub struct VariableGenerator {
    variables: Vec<VariableRef>,
    by_id: HashMap<VariableId, usize>,
    next_id: u32,
}

impl VariableGenerator {
    /// Creates an empty generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a user variable. Declaring an existing name yields a new,
    /// distinct binding (shadowing is resolved by the parser, not here).
    pub fn declare(&mut self, name: impl Into<String>) -> VariableRef {
        let id = self.allocate_id();
        self.push(Variable::new(id, name))
    }

    /// Creates a temporary whose name is its numeric id.
    pub fn create_temporary(&mut self) -> VariableRef {
        let id = self.allocate_id();
        self.push(Variable::new(id, id.0.to_string()))
    }

    /// Looks up a variable by id.
    pub fn get(&self, id: VariableId) -> Option<&VariableRef> {
        self.by_id.get(&id).map(|&idx| &self.variables[idx])
    }

    /// Returns the most recently declared variable with the given name.
    pub fn by_name(&self, name: &str) -> Option<&VariableRef> {
        self.variables.iter().rev().find(|var| var.name == name)
    }

    /// Returns all user-defined variables in declaration order.
    pub fn user_variables(&self) -> Vec<VariableRef> {
        self.variables
            .iter()
            .filter(|var| var.is_user_defined())
            .cloned()
            .collect()
    }

    /// Number of variables minted so far.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns true when no variable has been minted.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn allocate_id(&mut self) -> VariableId {
        let id = VariableId(self.next_id);
        self.next_id += 1;
        id
    }

    fn push(&mut self, variable: Variable) -> VariableRef {
        let var = Arc::new(variable);
        self.by_id.insert(var.id, self.variables.len());
        self.variables.push(Arc::clone(&var));
        var
    }
}
