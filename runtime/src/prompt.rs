//! Instruction text sent to the chat model.

use ordersight_core::partition::PartitionFilter;
use ordersight_core::schema::SchemaGraph;

use crate::retrieval::GroundingExample;

/// Everything interpolated into the agent's system instruction for one turn.
pub struct InstructionContext<'a> {
    pub dialect: &'a str,
    pub top_k: usize,
    pub filter: &'a PartitionFilter,
    pub schema: &'a SchemaGraph,
    pub examples: &'a [GroundingExample],
}

pub fn system_instruction(ctx: &InstructionContext<'_>) -> String {
    let fragment = ctx.filter.fragment();
    let fact = ctx.schema.fact_table();
    let column = ctx.schema.partition_column();

    let mut out = format!(
        "You are an agent that answers questions by querying a SQL database.
Given an input question, write a syntactically correct {dialect} query, run it, look at the results and return the answer.
Map the user's wording to the real column names, allowing for spaces, underscores and capitalization differences.
Never correct or normalize values the user supplies, such as names. Use them exactly as written, even when they look misspelled.
When a person's name is in possessive form (for example \"Steve Roger's lease\"), treat the part before 's as the last name only.
Unless the user asks for a specific number of results, limit every query to at most {top_k} rows.
Order the results by a relevant column to return the most useful rows.
Never select every column of a table; select only the columns the question needs.
Only use the provided tools, and only use what they return to build your final answer.
Always check a query with sql_db_query_checker before running it with sql_db_query. If execution returns an error, rewrite the query and try again.

Do NOT issue data-modifying statements (INSERT, UPDATE, DELETE, DROP, ALTER, TRUNCATE, MERGE). Only a single SELECT or WITH statement is accepted.

Always start by listing the tables in the database with sql_db_list_tables. Do not skip this step.
Before constructing a query, fetch the schema of every table it needs with sql_db_schema.
  - Do not assume a table has a column without verifying it in the schema.
  - If a field is not in the first table, keep checking the others.
  - Prefer columns that uniquely identify records over columns that merely share a name.

Mandatory filter:
  - Every query must contain the condition `{fragment}`, written exactly like that, character for character.
  - {column} exists only on the {fact} table.
  - If the question is not about the {fact} table, join the {fact} table through the documented relationships and apply `{fragment}` there.
  - Every table connects to the {fact} table directly or through one intermediate table.
  - Queries without `{fragment}` are rejected before they reach the database.
  - Answer only from rows the database returned; never invent results.

",
        dialect = ctx.dialect,
        top_k = ctx.top_k,
    );

    out.push_str(&ctx.schema.describe(fragment));

    if !ctx.examples.is_empty() {
        out.push_str(
            "\nThe following queries answered similar questions. Use them only as a structural \
             reference. Do not copy or run them; write a new query for the user's request.\n",
        );
        for example in ctx.examples {
            out.push_str(&format!("```sql\n{}\n```\n", example.sql_query.trim()));
        }
    }
    out
}

/// Review prompt used by the query-checker tool.
pub fn checker_instruction(query: &str, dialect: &str, fragment: &str) -> String {
    format!(
        "{query}
Double check the {dialect} query above for common mistakes, including:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should have been used
- Using BETWEEN for exclusive ranges
- Data type mismatch in predicates
- Properly quoting identifiers
- Using the correct number of arguments for functions
- Casting to the correct data type
- Using the proper columns for joins

If any of these mistakes are present, rewrite the query. Otherwise reproduce the original query.
Do not infer information that is not explicitly provided.
Never alter user-provided names or personal values. Keep their exact spelling.
Possessive names like \"Steve Roger's\" refer to someone whose last name is \"Roger\".
Tables must be joined on their real key relationships.
The condition `{fragment}` is mandatory and must stay in the final query exactly as written.
Output the final SQL query only, without commentary or code fences.

SQL Query: "
    )
}

/// Strips a Markdown code fence the model sometimes wraps around a reviewed query.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    let rest = rest
        .strip_prefix("sql")
        .or_else(|| rest.strip_prefix("SQL"))
        .unwrap_or(rest);
    rest.trim()
}
