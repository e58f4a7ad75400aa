//! REQL text parser (spec §4.4, §6 "REQL surface"). Walks a pest parse tree
//! into the [`super::ast`] IR; the planner and executor never see REQL text.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::error::EngineError;
use crate::query::ast::{AggFunc, GraphPattern, Projection, QueryForm, SelectQuery};
use crate::query::filter_expr::{try_flatten_and, Atom, BoolExpr, CompareOp};
use crate::query::term::{Term, Triple};

#[derive(Parser)]
#[grammar = "query/reql/grammar.pest"]
struct ReqlParser;

/// Parses a REQL query string into a [`SelectQuery`]. `ASK`/`DESCRIBE`
/// queries come back as a `SelectQuery` too, distinguished by `form`.
pub fn parse(input: &str) -> Result<SelectQuery, EngineError> {
    let mut pairs = ReqlParser::parse(Rule::root, input).map_err(to_parse_error)?;
    let root = pairs.next().expect("root always present after a successful parse");
    let query_pair = root
        .into_inner()
        .find(|p| p.as_rule() == Rule::query)
        .expect("root always contains a query");
    let form = query_pair
        .into_inner()
        .next()
        .expect("query always contains exactly one form");
    match form.as_rule() {
        Rule::select_query => parse_select(form),
        Rule::ask_query => parse_ask(form),
        Rule::describe_query => parse_describe(form),
        _ => unreachable!("query only ever matches select_query | ask_query | describe_query"),
    }
}

fn to_parse_error(e: pest::error::Error<Rule>) -> EngineError {
    let (line, column) = match e.line_col() {
        pest::error::LineColLocation::Pos((l, c)) => (l, c),
        pest::error::LineColLocation::Span((l, c), _) => (l, c),
    };
    EngineError::QueryParse { message: e.to_string(), line, column }
}

fn parse_err(message: impl Into<String>) -> EngineError {
    EngineError::QueryParse { message: message.into(), line: 0, column: 0 }
}

fn strip_var(s: &str) -> String {
    s.trim_start_matches('?').to_string()
}

fn string_literal_text(pair: Pair<Rule>) -> String {
    let s = pair.as_str();
    s[1..s.len() - 1].to_string()
}

fn literal_text(pair: Pair<Rule>) -> String {
    let inner = pair.into_inner().next().expect("literal always wraps one alternative");
    match inner.as_rule() {
        Rule::string_literal => string_literal_text(inner),
        Rule::number_literal | Rule::bare_literal => inner.as_str().to_string(),
        _ => unreachable!("literal only ever matches string_literal | number_literal | bare_literal"),
    }
}

fn parse_term(pair: Pair<Rule>) -> Term {
    let inner = pair.into_inner().next().expect("term always wraps one alternative");
    match inner.as_rule() {
        Rule::var => Term::Var(strip_var(inner.as_str())),
        Rule::literal => Term::Const(literal_text(inner)),
        _ => unreachable!("term only ever matches var | literal"),
    }
}

fn parse_triple(pair: Pair<Rule>) -> Triple {
    let mut it = pair.into_inner();
    let subject = parse_term(it.next().expect("triple has a subject term"));
    let predicate = it.next().expect("triple has a predicate").as_str().to_string();
    let object = parse_term(it.next().expect("triple has an object term"));
    Triple::new(subject, predicate, object)
}

fn parse_group_graph_pattern(pair: Pair<Rule>) -> Result<GraphPattern, EngineError> {
    let mut groups = pair.into_inner().filter(|p| p.as_rule() == Rule::pattern_group);
    let first = groups.next().ok_or_else(|| parse_err("empty graph pattern"))?;
    let mut pattern = parse_pattern_group(first)?;
    for g in groups {
        pattern.union_with.push(parse_pattern_group(g)?);
    }
    Ok(pattern)
}

fn find_ggp(pair: Pair<Rule>) -> Result<GraphPattern, EngineError> {
    let ggp = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::group_graph_pattern)
        .ok_or_else(|| parse_err("expected a { ... } graph pattern"))?;
    parse_group_graph_pattern(ggp)
}

fn parse_pattern_group(pair: Pair<Rule>) -> Result<GraphPattern, EngineError> {
    let mut gp = GraphPattern::default();
    for element in pair.into_inner() {
        // `pattern_element` always wraps exactly one alternative.
        let inner = element
            .into_inner()
            .next()
            .expect("pattern_element always wraps one alternative");
        match inner.as_rule() {
            Rule::triple => gp.triples.push(parse_triple(inner)),
            Rule::optional_block => gp.optional.push(find_ggp(inner)?),
            Rule::minus_block => gp.minus.push(find_ggp(inner)?),
            Rule::not_exists_block => gp.not_exists.push(find_ggp(inner)?),
            Rule::values_block => {
                let mut it = inner.into_inner();
                let var = strip_var(it.next().expect("VALUES clause names a variable").as_str());
                let values = it
                    .map(|v| literal_text(v.into_inner().next().expect("value_literal wraps one literal")))
                    .collect();
                gp.values.push((var, values));
            }
            Rule::filter_clause => {
                let expr = parse_bool_expr(
                    inner.into_inner().next().expect("filter_clause always wraps a bool_expr"),
                )?;
                match try_flatten_and(&expr) {
                    Some(atoms) => gp.inline_filters.extend(atoms),
                    None => gp.extra_filters.push(expr),
                }
            }
            _ => unreachable!("pattern_element alternatives are exhaustively matched above"),
        }
    }
    Ok(gp)
}

/// Moves every `extra_filters` entry — from `gp` itself and every nested
/// sub-pattern — into `out`, since the network has no way to express a
/// non-conjunctive FILTER at any nesting depth.
fn drain_extra_filters(gp: &mut GraphPattern, out: &mut Vec<BoolExpr>) {
    out.append(&mut gp.extra_filters);
    for sub in gp
        .optional
        .iter_mut()
        .chain(gp.union_with.iter_mut())
        .chain(gp.not_exists.iter_mut())
        .chain(gp.minus.iter_mut())
    {
        drain_extra_filters(sub, out);
    }
}

fn parse_bool_expr(pair: Pair<Rule>) -> Result<BoolExpr, EngineError> {
    let mut terms = pair
        .into_inner()
        .map(parse_bool_term)
        .collect::<Result<Vec<_>, EngineError>>()?;
    if terms.len() == 1 {
        Ok(terms.pop().unwrap())
    } else {
        Ok(BoolExpr::Or(terms))
    }
}

fn parse_bool_term(pair: Pair<Rule>) -> Result<BoolExpr, EngineError> {
    let mut factors = pair
        .into_inner()
        .map(parse_bool_factor)
        .collect::<Result<Vec<_>, EngineError>>()?;
    if factors.len() == 1 {
        Ok(factors.pop().unwrap())
    } else {
        Ok(BoolExpr::And(factors))
    }
}

fn parse_bool_factor(pair: Pair<Rule>) -> Result<BoolExpr, EngineError> {
    let inner = pair.into_inner().next().expect("bool_factor always wraps one alternative");
    match inner.as_rule() {
        Rule::not_factor => {
            let f = inner.into_inner().next().expect("not_factor wraps a bool_factor");
            Ok(BoolExpr::Not(Box::new(parse_bool_factor(f)?)))
        }
        Rule::paren_expr => {
            let e = inner.into_inner().next().expect("paren_expr wraps a bool_expr");
            parse_bool_expr(e)
        }
        Rule::atom => parse_atom(inner).map(BoolExpr::Atom),
        _ => unreachable!("bool_factor only ever matches not_factor | paren_expr | atom"),
    }
}

fn parse_atom(pair: Pair<Rule>) -> Result<Atom, EngineError> {
    let inner = pair.into_inner().next().expect("atom always wraps one alternative");
    Ok(match inner.as_rule() {
        Rule::bound_atom => {
            let v = inner.into_inner().next().expect("BOUND names a variable");
            Atom::Bound(strip_var(v.as_str()))
        }
        Rule::regex_atom => {
            let mut it = inner.into_inner();
            let term = parse_term(it.next().expect("REGEX takes a term"));
            let pattern = string_literal_text(it.next().expect("REGEX takes a string pattern"));
            Atom::Regex(term, pattern)
        }
        Rule::contains_atom => {
            let mut it = inner.into_inner();
            let a = parse_term(it.next().expect("CONTAINS takes two terms"));
            let b = parse_term(it.next().expect("CONTAINS takes two terms"));
            Atom::Contains(a, b)
        }
        Rule::strstarts_atom => {
            let mut it = inner.into_inner();
            let a = parse_term(it.next().expect("STRSTARTS takes two terms"));
            let b = parse_term(it.next().expect("STRSTARTS takes two terms"));
            Atom::StrStarts(a, b)
        }
        Rule::strends_atom => {
            let mut it = inner.into_inner();
            let a = parse_term(it.next().expect("STRENDS takes two terms"));
            let b = parse_term(it.next().expect("STRENDS takes two terms"));
            Atom::StrEnds(a, b)
        }
        Rule::compare_atom => {
            let mut it = inner.into_inner();
            let lhs = parse_term(it.next().expect("compare_atom has a left term"));
            let op_pair = it.next().expect("compare_atom has an operator");
            let rhs = parse_term(it.next().expect("compare_atom has a right term"));
            let op = match op_pair.as_str() {
                "=" => CompareOp::Eq,
                "!=" => CompareOp::Neq,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                ">=" => CompareOp::Ge,
                other => return Err(parse_err(format!("unknown comparison operator {other}"))),
            };
            Atom::Compare(op, lhs, rhs)
        }
        _ => unreachable!("atom alternatives are exhaustively matched above"),
    })
}

fn parse_projection(pair: Pair<Rule>) -> Result<Projection, EngineError> {
    let inner = pair.into_inner().next().expect("projection always wraps one alternative");
    match inner.as_rule() {
        Rule::var => Ok(Projection::Var(strip_var(inner.as_str()))),
        Rule::aggregate_proj => parse_aggregate_proj(inner),
        _ => unreachable!("projection only ever matches aggregate_proj | var"),
    }
}

fn parse_aggregate_proj(pair: Pair<Rule>) -> Result<Projection, EngineError> {
    let mut it = pair.into_inner();
    let func_pair = it.next().expect("aggregate_proj names a function");
    let arg_pair = it.next().expect("aggregate_proj has an argument");
    let alias_pair = it.next().expect("aggregate_proj names an AS alias");

    let arg_inner = arg_pair.into_inner().next().expect("agg_arg always wraps one alternative");
    let (var, distinct) = match arg_inner.as_rule() {
        Rule::star_arg => (None, false),
        Rule::distinct_arg => {
            let mut dit = arg_inner.into_inner();
            let _distinct_kw = dit.next();
            let v = dit.next().expect("distinct_arg names a variable");
            (Some(strip_var(v.as_str())), true)
        }
        Rule::var => (Some(strip_var(arg_inner.as_str())), false),
        _ => unreachable!("agg_arg only ever matches star_arg | distinct_arg | var"),
    };

    let func_text = func_pair.as_str().to_ascii_uppercase();
    let func = match (func_text.as_str(), distinct) {
        ("COUNT", true) => AggFunc::CountDistinct,
        ("COUNT", false) => AggFunc::Count,
        ("SUM", _) => AggFunc::Sum,
        ("AVG", _) => AggFunc::Avg,
        ("MIN", _) => AggFunc::Min,
        ("MAX", _) => AggFunc::Max,
        _ => return Err(parse_err(format!("unknown aggregate function {func_text}"))),
    };
    if distinct && func != AggFunc::CountDistinct {
        return Err(parse_err("DISTINCT is only supported inside COUNT"));
    }
    Ok(Projection::Aggregate { func, var, alias: strip_var(alias_pair.as_str()) })
}

fn parse_order_term(pair: Pair<Rule>) -> (String, bool) {
    let inner = pair.into_inner().next().expect("order_term always wraps one alternative");
    match inner.as_rule() {
        Rule::dir_term => {
            let mut it = inner.into_inner();
            let dir = it.next().expect("dir_term names a direction");
            let v = it.next().expect("dir_term names a variable");
            (strip_var(v.as_str()), dir.as_str().eq_ignore_ascii_case("desc"))
        }
        Rule::var => (strip_var(inner.as_str()), false),
        _ => unreachable!("order_term only ever matches dir_term | var"),
    }
}

fn parse_select(pair: Pair<Rule>) -> Result<SelectQuery, EngineError> {
    let mut q = SelectQuery { form: QueryForm::Select, ..Default::default() };
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::distinct_kw => q.distinct = true,
            Rule::projection => q.projection.push(parse_projection(p)?),
            Rule::group_graph_pattern => q.pattern = parse_group_graph_pattern(p)?,
            Rule::filter_clause => {
                let expr = parse_bool_expr(
                    p.into_inner().next().expect("filter_clause always wraps a bool_expr"),
                )?;
                q.filters.push(expr);
            }
            Rule::group_by_clause => {
                q.group_by = p.into_inner().map(|v| strip_var(v.as_str())).collect();
            }
            Rule::having_clause => {
                let expr = parse_bool_expr(
                    p.into_inner().next().expect("having_clause always wraps a bool_expr"),
                )?;
                q.having.push(expr);
            }
            Rule::order_by_clause => {
                q.order_by = p.into_inner().map(parse_order_term).collect();
            }
            Rule::limit_clause => {
                let n = p.into_inner().next().expect("LIMIT takes a number");
                q.limit = Some(
                    n.as_str()
                        .parse::<usize>()
                        .map_err(|_| parse_err("LIMIT must be a non-negative integer"))?,
                );
            }
            Rule::offset_clause => {
                let n = p.into_inner().next().expect("OFFSET takes a number");
                q.offset = Some(
                    n.as_str()
                        .parse::<usize>()
                        .map_err(|_| parse_err("OFFSET must be a non-negative integer"))?,
                );
            }
            _ => {}
        }
    }
    let mut bubbled = Vec::new();
    drain_extra_filters(&mut q.pattern, &mut bubbled);
    q.filters.extend(bubbled);
    Ok(q)
}

fn parse_ask(pair: Pair<Rule>) -> Result<SelectQuery, EngineError> {
    let pattern = find_ggp(pair)?;
    Ok(SelectQuery { form: QueryForm::Ask, pattern, ..Default::default() })
}

fn parse_describe(pair: Pair<Rule>) -> Result<SelectQuery, EngineError> {
    let mut var_name = None;
    let mut pattern = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::var => var_name = Some(strip_var(p.as_str())),
            Rule::group_graph_pattern => pattern = Some(parse_group_graph_pattern(p)?),
            _ => {}
        }
    }
    let mut q = SelectQuery { form: QueryForm::Describe, ..Default::default() };
    if let Some(v) = var_name {
        q.projection.push(Projection::Var(v));
    }
    q.pattern = pattern.unwrap_or_default();
    let mut bubbled = Vec::new();
    drain_extra_filters(&mut q.pattern, &mut bubbled);
    q.filters.extend(bubbled);
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let q = parse("SELECT ?x WHERE { ?x type Cat . }").expect("parses");
        assert_eq!(q.form, QueryForm::Select);
        assert_eq!(q.pattern.triples.len(), 1);
        assert_eq!(q.projection.len(), 1);
    }

    #[test]
    fn parses_filter_and_optional() {
        let q = parse(
            "SELECT ?x ?y WHERE { ?x knows ?y . OPTIONAL { ?y age ?n . } FILTER(?n > 10) }",
        )
        .expect("parses");
        assert_eq!(q.pattern.optional.len(), 1);
        assert_eq!(q.filters.len(), 1);
    }

    #[test]
    fn parses_union_and_not_exists() {
        let q = parse(
            "SELECT ?x WHERE { { ?x type Cat . } UNION { ?x type Dog . } FILTER NOT EXISTS { ?x status \"retired\" . } }",
        )
        .expect("parses");
        assert_eq!(q.pattern.union_with.len(), 1);
        assert_eq!(q.pattern.not_exists.len(), 1);
    }

    #[test]
    fn parses_aggregate_group_by_having() {
        let q = parse(
            "SELECT ?x (COUNT(DISTINCT ?y) AS ?n) WHERE { ?x knows ?y . } GROUP BY ?x HAVING(?n > 1) ORDER BY DESC(?n) LIMIT 5 OFFSET 1",
        )
        .expect("parses");
        assert_eq!(q.group_by, vec!["x".to_string()]);
        assert_eq!(q.having.len(), 1);
        assert_eq!(q.order_by, vec![("n".to_string(), true)]);
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.offset, Some(1));
    }

    #[test]
    fn malformed_query_reports_parse_error() {
        let err = parse("SELECT ?x WHERE ?x type Cat }").unwrap_err();
        assert!(matches!(err, EngineError::QueryParse { .. }));
    }

    #[test]
    fn non_conjunctive_inline_filter_bubbles_up() {
        let q = parse("SELECT ?x WHERE { ?x age ?n . FILTER(?n < 5 OR ?n > 65) }").expect("parses");
        assert!(q.pattern.inline_filters.is_empty());
        assert_eq!(q.filters.len(), 1);
    }

    #[test]
    fn ask_query_parses() {
        let q = parse("ASK WHERE { ?x type Cat . }").expect("parses");
        assert_eq!(q.form, QueryForm::Ask);
    }

    #[test]
    fn describe_query_parses() {
        let q = parse("DESCRIBE ?x WHERE { ?x type Cat . }").expect("parses");
        assert_eq!(q.form, QueryForm::Describe);
        assert_eq!(q.projection.len(), 1);
    }
}
