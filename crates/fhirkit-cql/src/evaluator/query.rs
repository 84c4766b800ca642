//! Query comprehension: source / let / where / aggregate / return / sort.

use super::{to_bool, CqlEvaluator};
use crate::context::CqlContext;
use crate::error::Result;
use crate::parser::ast::{self, SortDirection};
use fhirkit_fhirpath::evaluator::operations::collection as collection_ops;
use fhirkit_fhirpath::FhirPathValue;
use indexmap::IndexMap;
use std::cmp::Ordering;

impl CqlEvaluator {
    /// Evaluate a query.
    ///
    /// Sources are evaluated once; multiple sources iterate as a Cartesian
    /// product in declaration order. Each row binds its aliases and `let`
    /// names in a fresh scope, `where` filters with null treated as false,
    /// then either `aggregate` folds the surviving rows or `return` maps
    /// them (with optional de-duplication), and `sort` orders the result.
    pub(crate) fn evaluate_query(
        &self,
        query: &ast::Query,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        // Evaluate sources to collections up front
        let mut sources: Vec<(String, Vec<FhirPathValue>)> = Vec::new();
        for source in &query.sources {
            let value = self.eval(&source.expression, context)?;
            sources.push((source.alias.clone(), value.into_collection()));
        }

        // Row indices over the Cartesian product, declaration order
        let mut rows: Vec<Vec<usize>> = vec![Vec::new()];
        for (_, items) in &sources {
            let mut next = Vec::with_capacity(rows.len() * items.len().max(1));
            for row in &rows {
                for index in 0..items.len() {
                    let mut extended = row.clone();
                    extended.push(index);
                    next.push(extended);
                }
            }
            rows = next;
        }

        let single_alias = sources.len() == 1;
        let mut surviving: Vec<IndexMap<String, FhirPathValue>> = Vec::new();

        for row in rows {
            let mut bindings: IndexMap<String, FhirPathValue> = IndexMap::new();
            for ((alias, items), index) in sources.iter().zip(row.iter()) {
                bindings.insert(alias.clone(), items[*index].clone());
            }

            context.push_scope();
            for (alias, value) in &bindings {
                context.bind(alias.clone(), value.clone());
            }

            // let bindings, in declaration order, visible to later lets
            let mut kept = true;
            for let_clause in &query.lets {
                match self.eval(&let_clause.expression, context) {
                    Ok(value) => {
                        context.bind(let_clause.identifier.clone(), value.clone());
                        bindings.insert(let_clause.identifier.clone(), value);
                    }
                    Err(err) => {
                        context.pop_scope();
                        return Err(err);
                    }
                }
            }

            if let Some(where_clause) = &query.where_clause {
                match self.eval(where_clause, context) {
                    Ok(condition) => {
                        // null or false both drop the row
                        kept = to_bool(&condition) == Some(true);
                    }
                    Err(err) => {
                        context.pop_scope();
                        return Err(err);
                    }
                }
            }

            context.pop_scope();
            if kept {
                surviving.push(bindings);
            }
        }

        if let Some(aggregate) = &query.aggregate_clause {
            return self.fold_rows(aggregate, surviving, context);
        }

        let mut results: Vec<FhirPathValue> = Vec::new();
        for bindings in &surviving {
            let value = match &query.return_clause {
                Some(return_clause) => {
                    context.push_scope();
                    for (name, value) in bindings {
                        context.bind(name.clone(), value.clone());
                    }
                    let result = self.eval(&return_clause.expression, context);
                    context.pop_scope();
                    result?
                }
                None => {
                    if single_alias {
                        bindings[0].clone()
                    } else {
                        // Multi-source rows without a return are alias tuples
                        FhirPathValue::Tuple(
                            bindings
                                .iter()
                                .filter(|(name, _)| {
                                    query.sources.iter().any(|s| &s.alias == *name)
                                })
                                .map(|(name, value)| (name.clone(), value.clone()))
                                .collect(),
                        )
                    }
                }
            };
            if !value.is_null() {
                results.push(value);
            }
        }

        if query
            .return_clause
            .as_ref()
            .map(|r| r.distinct)
            .unwrap_or(false)
        {
            results = collection_ops::distinct(&results, self.converter());
        }

        if let Some(sort) = &query.sort_clause {
            results = self.sort_results(results, sort, context)?;
        }

        Ok(FhirPathValue::Collection(results))
    }

    fn fold_rows(
        &self,
        aggregate: &ast::AggregateClause,
        rows: Vec<IndexMap<String, FhirPathValue>>,
        context: &mut CqlContext,
    ) -> Result<FhirPathValue> {
        let mut rows = rows;
        if aggregate.distinct {
            let mut seen: Vec<IndexMap<String, FhirPathValue>> = Vec::new();
            rows.retain(|bindings| {
                let duplicate = seen.iter().any(|existing| {
                    existing.len() == bindings.len()
                        && existing.iter().zip(bindings.iter()).all(|((_, a), (_, b))| {
                            a.equals(b, self.converter()) == Some(true)
                        })
                });
                if !duplicate {
                    seen.push(bindings.clone());
                }
                !duplicate
            });
        }

        let mut accumulator = match &aggregate.starting {
            Some(starting) => self.eval(starting, context)?,
            None => FhirPathValue::Null,
        };

        for bindings in rows {
            context.push_scope();
            for (name, value) in &bindings {
                context.bind(name.clone(), value.clone());
            }
            context.bind(aggregate.identifier.clone(), accumulator.clone());
            let result = self.eval(&aggregate.expression, context);
            context.pop_scope();
            accumulator = result?;
        }
        Ok(accumulator)
    }

    /// Stable sort of result elements by the sort items. Nulls sort last
    /// ascending and first descending.
    fn sort_results(
        &self,
        results: Vec<FhirPathValue>,
        sort: &ast::SortClause,
        context: &mut CqlContext,
    ) -> Result<Vec<FhirPathValue>> {
        // Precompute sort keys per element
        let mut keyed: Vec<(Vec<FhirPathValue>, FhirPathValue)> =
            Vec::with_capacity(results.len());
        for element in results {
            let mut keys = Vec::with_capacity(sort.items.len());
            for item in &sort.items {
                let key = match &item.expression {
                    Some(expression) => {
                        let saved = context.sort_element.replace(element.clone());
                        let key = self.eval(expression, context);
                        context.sort_element = saved;
                        key?
                    }
                    None => element.clone(),
                };
                keys.push(key);
            }
            keyed.push((keys, element));
        }

        let converter = self.converter();
        keyed.sort_by(|(a_keys, _), (b_keys, _)| {
            for (item, (a, b)) in sort.items.iter().zip(a_keys.iter().zip(b_keys.iter())) {
                let ordering = match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    // nulls last ascending, first descending
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.compare(b, converter).unwrap_or(Ordering::Equal),
                };
                let ordering = match item.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, element)| element).collect())
    }
}
