mod prop_expr;
mod prop_query;
mod prop_sort;
mod prop_update;
