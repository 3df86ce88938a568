//! Module `expr` implement the expression engine used by filters, update
//! assignments, column defaults and yield lists.
//!
//! Expressions arrive over the wire in a compact prefix encoding, are
//! decoded into an [Expr] tree and evaluated as a pure function over a
//! [PropContext]. Evaluation follows three-valued logic: null propagates
//! through arithmetic and comparisons, and `and`/`or` short-circuit the
//! way SQL does. Type errors are [Error::IllegalData].

use std::convert::TryInto;

use crate::{
    types::{partial_cmp, Value},
    Error, Result,
};

/// Name-to-value lookup an expression is evaluated against. Besides the
/// row's own columns this carries the implicit columns (vertices: vid,
/// tag-id; edges: src, type, rank, dst).
pub trait PropContext {
    fn prop(&self, name: &str) -> Option<Value>;
}

/// Context with no properties; every lookup yields null. Column defaults
/// are evaluated under this.
pub struct NullContext;

impl PropContext for NullContext {
    fn prop(&self, _name: &str) -> Option<Value> {
        Some(Value::Null)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// An expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const { value: Value },
    Prop { name: String },
    Unary { op: UnOp, arg: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

// expression node tags, stable wire contract.
const TAG_CONST: u8 = 0x00;
const TAG_PROP: u8 = 0x01;
const TAG_UNARY: u8 = 0x02;
const TAG_BINARY: u8 = 0x03;

// value tags within a Const node.
const VAL_NULL: u8 = 0x00;
const VAL_BOOL: u8 = 0x01;
const VAL_INT: u8 = 0x02;
const VAL_FLOAT: u8 = 0x03;
const VAL_STR: u8 = 0x04;

impl Expr {
    pub fn constant<V: Into<Value>>(value: V) -> Expr {
        Expr::Const { value: value.into() }
    }

    pub fn prop(name: &str) -> Expr {
        Expr::Prop { name: name.to_string() }
    }

    pub fn unary(op: UnOp, arg: Expr) -> Expr {
        Expr::Unary { op, arg: Box::new(arg) }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Serialize this expression into its wire encoding.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Expr::Const { value } => {
                buf.push(TAG_CONST);
                encode_value(value, buf);
            }
            Expr::Prop { name } => {
                buf.push(TAG_PROP);
                encode_str(name, buf);
            }
            Expr::Unary { op, arg } => {
                buf.push(TAG_UNARY);
                buf.push(*op as u8);
                arg.encode(buf);
            }
            Expr::Binary { op, lhs, rhs } => {
                buf.push(TAG_BINARY);
                buf.push(*op as u8);
                lhs.encode(buf);
                rhs.encode(buf);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.encode(&mut buf);
        buf
    }

    /// Reverse of [Expr::encode]. The whole of `data` must be consumed.
    pub fn decode(data: &[u8]) -> Result<Expr> {
        let (expr, n) = decode_expr(data)?;
        if n != data.len() {
            err_at!(DecodeFail, msg: "trailing garbage {}/{}", n, data.len())
        } else {
            Ok(expr)
        }
    }

    /// Evaluate this expression under `ctx`.
    pub fn eval(&self, ctx: &dyn PropContext) -> Result<Value> {
        match self {
            Expr::Const { value } => Ok(value.clone()),
            Expr::Prop { name } => match ctx.prop(name) {
                Some(value) => Ok(value),
                None => err_at!(IllegalData, msg: "unknown property {:?}", name),
            },
            Expr::Unary { op, arg } => eval_unary(*op, arg.eval(ctx)?),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And | BinOp::Or => eval_logic(*op, lhs, rhs, ctx),
                _ => eval_binary(*op, lhs.eval(ctx)?, rhs.eval(ctx)?),
            },
        }
    }
}

fn encode_str(s: &str, buf: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(VAL_NULL),
        Value::Bool(v) => {
            buf.push(VAL_BOOL);
            buf.push(*v as u8);
        }
        Value::Int(v) => {
            buf.push(VAL_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            buf.push(VAL_FLOAT);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Str(v) => {
            buf.push(VAL_STR);
            encode_str(v, buf);
        }
    }
}

fn decode_str(data: &[u8]) -> Result<(String, usize)> {
    check_remaining!(data, 2, "expr-str-len")?;
    let len = u16::from_le_bytes(data[..2].try_into().unwrap()) as usize;
    check_remaining!(data, 2 + len, "expr-str")?;
    let s = err_at!(DecodeFail, std::str::from_utf8(&data[2..2 + len]))?;
    Ok((s.to_string(), 2 + len))
}

fn decode_value(data: &[u8]) -> Result<(Value, usize)> {
    check_remaining!(data, 1, "expr-value-tag")?;
    match data[0] {
        VAL_NULL => Ok((Value::Null, 1)),
        VAL_BOOL => {
            check_remaining!(data, 2, "expr-bool")?;
            Ok((Value::Bool(data[1] != 0), 2))
        }
        VAL_INT => {
            check_remaining!(data, 9, "expr-int")?;
            let v = i64::from_le_bytes(data[1..9].try_into().unwrap());
            Ok((Value::Int(v), 9))
        }
        VAL_FLOAT => {
            check_remaining!(data, 9, "expr-float")?;
            let bits = u64::from_le_bytes(data[1..9].try_into().unwrap());
            Ok((Value::Float(f64::from_bits(bits)), 9))
        }
        VAL_STR => {
            let (s, n) = decode_str(&data[1..])?;
            Ok((Value::Str(s), 1 + n))
        }
        tag => err_at!(DecodeFail, msg: "expr-value-tag {:x}", tag),
    }
}

fn decode_unop(code: u8) -> Result<UnOp> {
    match code {
        0 => Ok(UnOp::Not),
        1 => Ok(UnOp::Neg),
        code => err_at!(DecodeFail, msg: "expr-unop {:x}", code),
    }
}

fn decode_binop(code: u8) -> Result<BinOp> {
    let op = match code {
        0 => BinOp::Add,
        1 => BinOp::Sub,
        2 => BinOp::Mul,
        3 => BinOp::Div,
        4 => BinOp::Mod,
        5 => BinOp::Eq,
        6 => BinOp::Ne,
        7 => BinOp::Lt,
        8 => BinOp::Le,
        9 => BinOp::Gt,
        10 => BinOp::Ge,
        11 => BinOp::And,
        12 => BinOp::Or,
        code => err_at!(DecodeFail, msg: "expr-binop {:x}", code)?,
    };
    Ok(op)
}

fn decode_expr(data: &[u8]) -> Result<(Expr, usize)> {
    check_remaining!(data, 1, "expr-tag")?;
    match data[0] {
        TAG_CONST => {
            let (value, n) = decode_value(&data[1..])?;
            Ok((Expr::Const { value }, 1 + n))
        }
        TAG_PROP => {
            let (name, n) = decode_str(&data[1..])?;
            Ok((Expr::Prop { name }, 1 + n))
        }
        TAG_UNARY => {
            check_remaining!(data, 2, "expr-unary")?;
            let op = decode_unop(data[1])?;
            let (arg, n) = decode_expr(&data[2..])?;
            Ok((Expr::unary(op, arg), 2 + n))
        }
        TAG_BINARY => {
            check_remaining!(data, 2, "expr-binary")?;
            let op = decode_binop(data[1])?;
            let (lhs, n) = decode_expr(&data[2..])?;
            let (rhs, m) = decode_expr(&data[2 + n..])?;
            Ok((Expr::binary(op, lhs, rhs), 2 + n + m))
        }
        tag => err_at!(DecodeFail, msg: "expr-tag {:x}", tag),
    }
}

fn eval_unary(op: UnOp, val: Value) -> Result<Value> {
    match (op, val) {
        (_, Value::Null) => Ok(Value::Null),
        (UnOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
        (UnOp::Neg, Value::Int(v)) => match v.checked_neg() {
            Some(v) => Ok(Value::Int(v)),
            None => err_at!(IllegalData, msg: "negate overflow {}", v),
        },
        (UnOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (op, val) => err_at!(IllegalData, msg: "{:?} on {:?}", op, val),
    }
}

fn eval_logic(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &dyn PropContext) -> Result<Value> {
    let a = eval_truth(lhs.eval(ctx)?)?;
    match (op, a) {
        (BinOp::And, Some(false)) => return Ok(Value::Bool(false)),
        (BinOp::Or, Some(true)) => return Ok(Value::Bool(true)),
        _ => (),
    }
    let b = eval_truth(rhs.eval(ctx)?)?;
    let val = match (op, a, b) {
        (BinOp::And, _, Some(false)) => Value::Bool(false),
        (BinOp::And, Some(true), Some(true)) => Value::Bool(true),
        (BinOp::Or, _, Some(true)) => Value::Bool(true),
        (BinOp::Or, Some(false), Some(false)) => Value::Bool(false),
        (_, _, _) => Value::Null,
    };
    Ok(val)
}

fn eval_truth(val: Value) -> Result<Option<bool>> {
    match val {
        Value::Bool(v) => Ok(Some(v)),
        Value::Null => Ok(None),
        val => err_at!(IllegalData, msg: "boolean operand {:?}", val),
    }
}

fn eval_binary(op: BinOp, a: Value, b: Value) -> Result<Value> {
    use BinOp::*;

    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match op {
        Add | Sub | Mul | Div | Mod => eval_arith(op, a, b),
        Eq => Ok(Value::Bool(a == b)),
        Ne => Ok(Value::Bool(a != b)),
        Lt | Le | Gt | Ge => match partial_cmp(&a, &b) {
            Some(ord) => {
                let res = match op {
                    Lt => ord.is_lt(),
                    Le => ord.is_le(),
                    Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                Ok(Value::Bool(res))
            }
            None => err_at!(IllegalData, msg: "compare {:?} with {:?}", a, b),
        },
        And | Or => unreachable!(),
    }
}

fn eval_arith(op: BinOp, a: Value, b: Value) -> Result<Value> {
    use BinOp::*;
    use Value::{Float, Int, Str};

    let val = match (op, a, b) {
        (Add, Str(x), Str(y)) => Str(x + &y),
        (op, Int(x), Int(y)) => {
            let res = match op {
                Add => x.checked_add(y),
                Sub => x.checked_sub(y),
                Mul => x.checked_mul(y),
                Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            match res {
                Some(v) => Int(v),
                None => err_at!(IllegalData, msg: "{:?} {} {} out of range", op, x, y)?,
            }
        }
        (op, a, b) => match (numeric(&a), numeric(&b)) {
            (Some(x), Some(y)) => {
                let res = match op {
                    Add => x + y,
                    Sub => x - y,
                    Mul => x * y,
                    Div => x / y,
                    _ => x % y,
                };
                Float(res)
            }
            _ => err_at!(IllegalData, msg: "{:?} on {:?}, {:?}", op, a, b)?,
        },
    };
    Ok(val)
}

fn numeric(val: &Value) -> Option<f64> {
    match val {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
#[path = "expr_test.rs"]
mod expr_test;
