/// AST optimizer.
///
/// Pure tree-to-tree rewrite with two folds: constant folding of binary and
/// unary operators over literal operands, and dead-branch elimination of
/// `if` statements whose condition folds to a literal boolean. Everything
/// observable survives: side-effecting children are never reordered, and
/// call/write nodes are never removed.
///
/// Folding rules:
///   * integer op integer stays integer, except Slash which forces real
///   * IntDiv and Mod fold only over integers, never with a zero divisor
///   * mixed integer/real operands are left for the runtime conversion path
///   * relationals and and/or fold to boolean
///   * xor folds boolean*boolean to boolean and integer*integer to bitwise,
///     a mixed pair stays

use crate::ast::{Node, NodeKind, Token, TokenType};
use crate::value::VarType;

pub fn optimize(node: Node) -> Node {
    let mut node = node;

    if let Some(child) = node.left.take() {
        node.left = Some(Box::new(optimize(*child)));
    }
    if let Some(child) = node.right.take() {
        node.right = Some(Box::new(optimize(*child)));
    }
    if let Some(child) = node.extra.take() {
        node.extra = Some(Box::new(optimize(*child)));
    }
    let children = std::mem::take(&mut node.children);
    node.children = children.into_iter().map(optimize).collect();

    match node.kind {
        NodeKind::BinaryOp => fold_binary(node),
        NodeKind::UnaryOp => fold_unary(node),
        NodeKind::If => fold_if(node),
        _ => node,
    }
}

// ---------------------------------------------------------------------------
// Literal inspection
// ---------------------------------------------------------------------------

struct Const {
    value: f64,
    is_float: bool,
    is_bool: bool,
}

fn as_const(node: Option<&Node>) -> Option<Const> {
    let node = node?;
    match node.kind {
        NodeKind::Number => {
            if node.var_type.is_real() || node.token_type() == Some(TokenType::RealConst) {
                Some(Const { value: node.r_val, is_float: true, is_bool: false })
            } else {
                Some(Const { value: node.i_val as f64, is_float: false, is_bool: false })
            }
        }
        NodeKind::BooleanLit => Some(Const {
            value: node.b_val as i64 as f64,
            is_float: false,
            is_bool: true,
        }),
        _ => None,
    }
}

fn literal_position(node: &Node) -> (i32, i32) {
    node.token
        .as_ref()
        .map(|t| (t.line, t.column))
        .unwrap_or((0, 0))
}

fn make_int(v: i64, line: i32, column: i32) -> Node {
    let mut n = Node::new(
        NodeKind::Number,
        Some(Token::new(TokenType::IntegerConst, v.to_string(), line, column)),
    );
    n.i_val = v;
    n.set_type(VarType::Int64);
    n
}

fn make_real(v: f64, line: i32, column: i32) -> Node {
    let mut n = Node::new(
        NodeKind::Number,
        Some(Token::new(TokenType::RealConst, v.to_string(), line, column)),
    );
    n.r_val = v;
    n.set_type(VarType::Real);
    n
}

fn make_bool(v: bool, line: i32, column: i32) -> Node {
    let lexeme = if v { "true" } else { "false" };
    let ttype = if v { TokenType::True } else { TokenType::False };
    let mut n = Node::new(NodeKind::BooleanLit, Some(Token::new(ttype, lexeme, line, column)));
    n.b_val = v;
    n.set_type(VarType::Boolean);
    n
}

// ---------------------------------------------------------------------------
// Folds
// ---------------------------------------------------------------------------

fn fold_binary(node: Node) -> Node {
    let (lhs, rhs) = match (as_const(node.left.as_deref()), as_const(node.right.as_deref())) {
        (Some(l), Some(r)) => (l, r),
        _ => return node,
    };
    // Mixed int/real arithmetic keeps its runtime conversion behavior.
    if lhs.is_float != rhs.is_float {
        return node;
    }
    let op = match node.token_type() {
        Some(t) => t,
        None => return node,
    };

    let (lv, rv) = (lhs.value, rhs.value);
    let mut result_is_float = lhs.is_float || rhs.is_float;
    let mut result_is_bool = false;
    let result = match op {
        TokenType::Plus => lv + rv,
        TokenType::Minus => lv - rv,
        TokenType::Star => lv * rv,
        TokenType::Slash => {
            if rv == 0.0 {
                return node;
            }
            result_is_float = true;
            lv / rv
        }
        TokenType::IntDiv => {
            if lhs.is_float || rhs.is_float || rv == 0.0 {
                return node;
            }
            ((lv as i64) / (rv as i64)) as f64
        }
        TokenType::Mod => {
            if lhs.is_float || rhs.is_float || rv == 0.0 {
                return node;
            }
            ((lv as i64) % (rv as i64)) as f64
        }
        TokenType::Equal => {
            result_is_bool = true;
            (lv == rv) as i64 as f64
        }
        TokenType::NotEqual => {
            result_is_bool = true;
            (lv != rv) as i64 as f64
        }
        TokenType::Less => {
            result_is_bool = true;
            (lv < rv) as i64 as f64
        }
        TokenType::LessEqual => {
            result_is_bool = true;
            (lv <= rv) as i64 as f64
        }
        TokenType::Greater => {
            result_is_bool = true;
            (lv > rv) as i64 as f64
        }
        TokenType::GreaterEqual => {
            result_is_bool = true;
            (lv >= rv) as i64 as f64
        }
        TokenType::And => {
            result_is_bool = true;
            ((lv != 0.0) && (rv != 0.0)) as i64 as f64
        }
        TokenType::Or => {
            result_is_bool = true;
            ((lv != 0.0) || (rv != 0.0)) as i64 as f64
        }
        TokenType::Xor => {
            if lhs.is_float || rhs.is_float {
                return node;
            }
            match (lhs.is_bool, rhs.is_bool) {
                (true, true) => {
                    result_is_bool = true;
                    ((lv != 0.0) != (rv != 0.0)) as i64 as f64
                }
                (false, false) => ((lv as i64) ^ (rv as i64)) as f64,
                // Mixed boolean/integer xor stays for the runtime.
                _ => return node,
            }
        }
        _ => return node,
    };

    let (line, column) = literal_position(&node);
    if result_is_bool {
        make_bool(result != 0.0, line, column)
    } else if result_is_float {
        make_real(result, line, column)
    } else {
        make_int(result as i64, line, column)
    }
}

fn fold_unary(node: Node) -> Node {
    let operand = match as_const(node.left.as_deref()) {
        Some(c) => c,
        None => return node,
    };
    let op = match node.token_type() {
        Some(t) => t,
        None => return node,
    };

    let (line, column) = literal_position(&node);
    match op {
        TokenType::Minus => {
            if operand.is_float {
                make_real(-operand.value, line, column)
            } else {
                make_int(-(operand.value as i64), line, column)
            }
        }
        TokenType::Plus => *node.left.unwrap(),
        TokenType::Not => make_bool(operand.value == 0.0, line, column),
        _ => node,
    }
}

fn fold_if(mut node: Node) -> Node {
    let cond = match as_const(node.left.as_deref()) {
        Some(c) => c,
        None => return node,
    };
    let taken = if cond.value != 0.0 { node.right.take() } else { node.extra.take() };
    // The discarded branch and the condition drop here.
    match taken {
        Some(branch) => *branch,
        None => Node::new(NodeKind::NoOp, node.token.take()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::verify;

    fn binop(op: TokenType, lexeme: &str, left: Node, right: Node) -> Node {
        let mut n = Node::new(NodeKind::BinaryOp, Some(Token::new(op, lexeme, 1, 1)));
        n.set_left(left);
        n.set_right(right);
        n.set_type(VarType::Unknown);
        n
    }

    fn int_node(v: i64) -> Node {
        make_int(v, 1, 1)
    }

    fn real_node(v: f64) -> Node {
        make_real(v, 1, 1)
    }

    #[test]
    fn folds_integer_addition() {
        let n = optimize(binop(TokenType::Plus, "+", int_node(2), int_node(3)));
        assert_eq!(n.kind, NodeKind::Number);
        assert_eq!(n.i_val, 5);
        assert_eq!(n.var_type, VarType::Int64);
        assert!(verify(&n).is_ok());
    }

    #[test]
    fn slash_on_integers_folds_to_real() {
        let n = optimize(binop(TokenType::Slash, "/", int_node(1), int_node(2)));
        assert_eq!(n.var_type, VarType::Real);
        assert_eq!(n.r_val, 0.5);
    }

    #[test]
    fn mixed_int_real_does_not_fold() {
        let n = optimize(binop(TokenType::Plus, "+", int_node(1), real_node(2.0)));
        assert_eq!(n.kind, NodeKind::BinaryOp);
    }

    #[test]
    fn int_div_keeps_integer_semantics() {
        let n = optimize(binop(TokenType::IntDiv, "div", int_node(7), int_node(2)));
        assert_eq!(n.i_val, 3);
        let n = optimize(binop(TokenType::Mod, "mod", int_node(7), int_node(2)));
        assert_eq!(n.i_val, 1);
    }

    #[test]
    fn zero_divisor_is_left_for_the_runtime() {
        let n = optimize(binop(TokenType::IntDiv, "div", int_node(7), int_node(0)));
        assert_eq!(n.kind, NodeKind::BinaryOp);
        let n = optimize(binop(TokenType::Slash, "/", int_node(7), int_node(0)));
        assert_eq!(n.kind, NodeKind::BinaryOp);
    }

    #[test]
    fn xor_folds_by_operand_kind() {
        let n = optimize(binop(
            TokenType::Xor,
            "xor",
            make_bool(true, 1, 1),
            make_bool(true, 1, 1),
        ));
        assert_eq!(n.kind, NodeKind::BooleanLit);
        assert!(!n.b_val);

        let n = optimize(binop(TokenType::Xor, "xor", int_node(6), int_node(3)));
        assert_eq!(n.i_val, 5);

        let n = optimize(binop(TokenType::Xor, "xor", make_bool(true, 1, 1), int_node(3)));
        assert_eq!(n.kind, NodeKind::BinaryOp);
    }

    #[test]
    fn relational_fold_produces_boolean() {
        let n = optimize(binop(TokenType::Less, "<", int_node(1), int_node(2)));
        assert_eq!(n.kind, NodeKind::BooleanLit);
        assert!(n.b_val);
    }

    #[test]
    fn unary_folds() {
        let mut neg = Node::new(NodeKind::UnaryOp, Some(Token::new(TokenType::Minus, "-", 1, 1)));
        neg.set_left(int_node(4));
        let n = optimize(neg);
        assert_eq!(n.i_val, -4);

        let mut not = Node::new(NodeKind::UnaryOp, Some(Token::new(TokenType::Not, "!", 1, 1)));
        not.set_left(make_bool(false, 1, 1));
        let n = optimize(not);
        assert!(n.b_val);
    }

    #[test]
    fn dead_branch_elimination_takes_the_live_side() {
        let mut stmt = Node::new(NodeKind::If, None);
        stmt.set_left(int_node(0));
        stmt.set_right(make_int(111, 2, 1));
        stmt.set_extra(make_int(222, 3, 1));
        let n = optimize(stmt);
        assert_eq!(n.i_val, 222);

        let mut stmt = Node::new(NodeKind::If, None);
        stmt.set_left(make_bool(false, 1, 1));
        stmt.set_right(make_int(111, 2, 1));
        let n = optimize(stmt);
        assert_eq!(n.kind, NodeKind::NoOp);
    }

    #[test]
    fn folding_recurses_through_nested_expressions() {
        // (2 * 3) + (10 - 4) collapses to 12
        let n = optimize(binop(
            TokenType::Plus,
            "+",
            binop(TokenType::Star, "*", int_node(2), int_node(3)),
            binop(TokenType::Minus, "-", int_node(10), int_node(4)),
        ));
        assert_eq!(n.i_val, 12);
    }

    #[test]
    fn calls_survive_folding() {
        let mut call = Node::new(
            NodeKind::Call,
            Some(Token::new(TokenType::Identifier, "f", 1, 1)),
        );
        call.push_child(binop(TokenType::Plus, "+", int_node(1), int_node(1)));
        let n = optimize(call);
        assert_eq!(n.kind, NodeKind::Call);
        assert_eq!(n.children[0].i_val, 2);
    }
}
