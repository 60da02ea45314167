//! Handlers for the tags the reference parser produces.

use itertools::Itertools;

use super::{HandlerTableBuilder, Sexp, Value};
use crate::{
    compiler::{settings, Compiler},
    error::Error,
    ir::{Call, Node, Statement},
};

pub fn register(builder: HandlerTableBuilder) -> HandlerTableBuilder {
    builder
        .register("script", script)
        .register("eval_expression", eval_expression)
        .register("block", block)
        .register("lit", lit)
        .register("str", string)
        .register("nil", |_, _| Ok(Node::Nil))
        .register("true", |_, _| Ok(Node::True))
        .register("false", |_, _| Ok(Node::False))
        .register("self", |_, _| Ok(Node::SelfRef))
        .register("lvar", lvar)
        .register("lasgn", lasgn)
        .register("call", call)
        .register("fcall", fcall)
        .register("privately", privately)
}

fn only_child<'a>(sexp: &'a Sexp) -> Result<&'a Value, Error> {
    sexp.children
        .iter()
        .exactly_one()
        .map_err(|_| Error::malformed(&sexp.tag, "expected exactly one child"))
}

fn name_of<'a>(sexp: &Sexp, value: &'a Value) -> Result<&'a str, Error> {
    value
        .as_sym()
        .ok_or_else(|| Error::malformed(&sexp.tag, format!("expected a name, got {value}")))
}

fn statement(c: &mut Compiler<'_>, value: &Value) -> Result<Statement, Error> {
    let line = value.as_node().and_then(|n| n.line);
    let node = c.convert(value)?.unwrap_or(Node::Nil);
    Ok(Statement { line, node })
}

fn statements(c: &mut Compiler<'_>, values: &[Value]) -> Result<Vec<Statement>, Error> {
    values.iter().map(|v| statement(c, v)).collect()
}

/// Converts a body, splicing a top-level sequence into its statements.
fn body(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Vec<Statement>, Error> {
    let stmt = statement(c, only_child(sexp)?)?;
    Ok(match stmt.node {
        Node::Sequence(body) => body,
        _ => vec![stmt],
    })
}

fn script(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let body = body(c, sexp)?;
    Ok(Node::Script {
        body,
        local_count: c.local_count(),
    })
}

fn eval_expression(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let body = c.set(settings::EVAL, true, |c| body(c, sexp))?;
    Ok(Node::EvalExpression { body })
}

fn block(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    Ok(Node::Sequence(statements(c, &sexp.children)?))
}

fn lit(_: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    Ok(match only_child(sexp)? {
        Value::Nil => Node::Nil,
        Value::Bool(true) => Node::True,
        Value::Bool(false) => Node::False,
        Value::Int(i) => Node::Int(*i),
        Value::Str(s) => Node::Str(s.clone()),
        Value::Sym(s) => Node::Sym(s.clone()),
        Value::Node(n) => return Err(Error::malformed("lit", format!("{n} is not a literal"))),
    })
}

fn string(_: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    match only_child(sexp)? {
        Value::Str(s) => Ok(Node::Str(s.clone())),
        other => Err(Error::malformed("str", format!("expected a string, got {other}"))),
    }
}

fn lvar(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let name = name_of(sexp, only_child(sexp)?)?;
    c.lookup_local(name)
        .map(Node::Local)
        .ok_or_else(|| Error::malformed("lvar", format!("undefined local variable '{name}'")))
}

fn lasgn(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let Some((name, value)) = sexp.children.iter().collect_tuple() else {
        return Err(Error::malformed("lasgn", "expected a name and a value"));
    };
    let name = name_of(sexp, name)?;
    // The value is converted first so `x = x` sees the outer binding, if any.
    let value = c.convert(value)?.unwrap_or(Node::Nil);
    let local = match c.lookup_local(name) {
        Some(local) => local,
        None => c.declare_local(name),
    };
    Ok(Node::Assign(local, Box::new(value)))
}

fn send(
    c: &mut Compiler<'_>,
    sexp: &Sexp,
    receiver: Option<Node>,
    name: &Value,
    args: &[Value],
) -> Result<Node, Error> {
    let name = name_of(sexp, name)?.to_owned();
    let args = args
        .iter()
        .map(|a| c.convert(a).map(|n| n.unwrap_or(Node::Nil)))
        .collect::<Result<Vec<_>, Error>>()?;
    let private = receiver.is_none();
    Ok(c.call(Call {
        receiver: receiver.map(Box::new),
        name,
        args,
        private,
    }))
}

fn call(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let [receiver, name, args @ ..] = sexp.children.as_slice() else {
        return Err(Error::malformed("call", "expected a receiver and a name"));
    };
    let receiver = c.convert(receiver)?;
    send(c, sexp, receiver, name, args)
}

fn fcall(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let [name, args @ ..] = sexp.children.as_slice() else {
        return Err(Error::malformed("fcall", "expected a name"));
    };
    send(c, sexp, None, name, args)
}

fn privately(c: &mut Compiler<'_>, sexp: &Sexp) -> Result<Node, Error> {
    let body = c.set(settings::PRIVATELY, true, |c| statements(c, &sexp.children))?;
    Ok(Node::Sequence(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, ConfigStore},
        error::ErrorKind,
        generator::{Assembler, MathOp},
        ir::Local,
        node::HandlerTable,
    };

    fn sym(s: &str) -> Value {
        Value::Sym(s.to_owned())
    }

    fn convert(sexp: Sexp) -> Result<Node, Error> {
        let config = Config::default();
        let mut c = Compiler::new(&config, HandlerTable::standard(), Assembler::boxed);
        c.convert_node(&sexp)
    }

    fn body_of(node: Node) -> Vec<Node> {
        match node {
            Node::Script { body, .. } | Node::EvalExpression { body } | Node::Sequence(body) => {
                body.into_iter().map(|s| s.node).collect()
            }
            other => panic!("not a body: {other:?}"),
        }
    }

    #[test]
    fn script_counts_locals() {
        let node = convert(
            s!(
                block,
                s!(lasgn, sym("a"), s!(lit, Value::Int(1))),
                s!(lasgn, sym("b"), s!(lvar, sym("a"))),
                s!(lasgn, sym("a"), s!(nil))
            )
            .wrap("script"),
        )
        .unwrap();
        let Node::Script { body, local_count } = node else {
            panic!("expected a script");
        };
        assert_eq!(local_count, 2);
        assert_eq!(
            body[1].node,
            Node::Assign(Local::Slot(1), Box::new(Node::Local(Local::Slot(0))))
        );
        assert_eq!(body[2].node, Node::Assign(Local::Slot(0), Box::new(Node::Nil)));
    }

    #[test]
    fn statements_keep_their_lines() {
        let node = convert(s!(block, s!(nil).at_line(1), s!(self).at_line(2))).unwrap();
        let Node::Sequence(body) = node else {
            panic!("expected a sequence");
        };
        assert_eq!(
            body.iter().map(|s| s.line).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
    }

    #[test]
    fn undefined_local_is_malformed() {
        let err = convert(s!(lvar, sym("nope"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn non_node_child_is_a_type_error() {
        let err = convert(s!(block, Value::Int(3))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn unregistered_child_tag_is_unresolved() {
        let err = convert(s!(block, s!(nil), s!(frobnicate))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn sends_go_through_plugins() {
        let node = convert(s!(
            call,
            s!(lit, Value::Int(1)),
            sym("+"),
            s!(lit, Value::Int(2))
        ))
        .unwrap();
        assert!(matches!(node, Node::Math { op: MathOp::Add, .. }));

        let node = convert(s!(
            call,
            s!(self),
            sym("puts"),
            s!(str, Value::Str("hi".to_owned()))
        ))
        .unwrap();
        let Node::Send(call) = node else {
            panic!("expected a send");
        };
        assert!(!call.private);
        assert_eq!(call.args, vec![Node::Str("hi".to_owned())]);
    }

    #[test]
    fn suppressed_plugin_leaves_plain_send() {
        let mut store = ConfigStore::new();
        store.process_flags(&["no-fastmath"]);
        let config = store.freeze();
        let mut c = Compiler::new(&config, HandlerTable::standard(), Assembler::boxed);
        let node = c
            .convert_node(&s!(
                call,
                s!(lit, Value::Int(1)),
                sym("+"),
                s!(lit, Value::Int(2))
            ))
            .unwrap();
        assert!(matches!(node, Node::Send(_)));
    }

    #[test]
    fn fcall_and_privately_are_private() {
        let node = convert(s!(fcall, sym("puts"))).unwrap();
        assert!(matches!(node, Node::Send(Call { private: true, .. })));

        let node = convert(s!(privately, s!(call, s!(self), sym("helper")))).unwrap();
        let body = body_of(node);
        let [Node::Send(call)] = body.as_slice() else {
            panic!("expected one send");
        };
        assert!(call.private);

        let node = convert(s!(call, s!(self), sym("helper"))).unwrap();
        assert!(matches!(node, Node::Send(Call { private: false, .. })));
    }

    #[test]
    fn suppressed_privately_leaves_sends_public() {
        let mut store = ConfigStore::new();
        store.process_flags(&["no-privately"]);
        let config = store.freeze();
        let mut c = Compiler::new(&config, HandlerTable::standard(), Assembler::boxed);
        let node = c
            .convert_node(&s!(privately, s!(call, s!(self), sym("helper"))))
            .unwrap();
        let body = body_of(node);
        let [Node::Send(call)] = body.as_slice() else {
            panic!("expected one send");
        };
        assert!(!call.private);
    }

    #[test]
    fn call_without_name_is_malformed() {
        let err = convert(s!(call, s!(self))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);

        let err = convert(s!(call, s!(self), Value::Int(1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn eval_assignments_are_dynamic() {
        let node = convert(s!(lasgn, sym("x"), s!(nil)).wrap("eval_expression")).unwrap();
        assert_eq!(
            body_of(node),
            vec![Node::Assign(
                Local::Dynamic("x".to_owned()),
                Box::new(Node::Nil)
            )]
        );
    }
}
