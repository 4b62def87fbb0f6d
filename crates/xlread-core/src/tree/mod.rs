//! Key tree text parser.
//!
//! Several files embed parenthesized key/value text such as
//! `(."Stamp", 1200), (."Text", "Eyes closed")`. A node opens with `(."KEY"`;
//! its value is either a leaf up to the node's closing parenthesis or a
//! nested list of nodes. Parsing uses an explicit stack bounded by
//! [`MAX_DEPTH`], so hostile nesting cannot exhaust the call stack.
//!
//! Converting nodes to a mapping keeps the last value of a duplicated key.

pub mod error;
pub mod parser;

pub use error::TreeError;
pub use parser::{MAX_DEPTH, TreeNode, TreeValue, nodes_to_map, parse_key_tree, parse_nodes};
