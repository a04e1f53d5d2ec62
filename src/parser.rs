use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until},
    character::complete::{char, digit1, multispace0},
    combinator::{map_res, opt},
    sequence::{delimited, preceded},
    IResult,
};

/// One line of the interactive client grammar.
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Add { content: String, category: Option<String>, id: Option<String> },
    Search { query: String, limit: usize },
    Update { id: String, content: String },
    Remove { id: String },
    SetPref { key: String, value: String },
    GetPref { key: String },
    Help,
    Exit,
}

const DEFAULT_LIMIT: usize = 5;

// --- BASIC PARSERS ---

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

// --- HELPERS ---

fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_add(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ADD")(input)?;
    let (input, content) = ws(parse_quoted_string)(input)?;
    let (input, category) =
        opt(preceded(ws(tag_ci("CATEGORY")), ws(parse_quoted_string)))(input)?;
    let (input, id) = opt(preceded(ws(tag_ci("ID")), ws(parse_quoted_string)))(input)?;
    Ok((input, Command::Add { content, category, id }))
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SEARCH")(input)?;
    let (input, query) = ws(parse_quoted_string)(input)?;
    let (input, limit) = opt(preceded(ws(tag_ci("LIMIT")), ws(parse_usize)))(input)?;
    Ok((input, Command::Search { query, limit: limit.unwrap_or(DEFAULT_LIMIT) }))
}

fn parse_update(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("UPDATE")(input)?;
    let (input, id) = ws(parse_quoted_string)(input)?;
    let (input, content) = ws(parse_quoted_string)(input)?;
    Ok((input, Command::Update { id, content }))
}

fn parse_remove(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("REMOVE")(input)?;
    let (input, id) = ws(parse_quoted_string)(input)?;
    Ok((input, Command::Remove { id }))
}

fn parse_set(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SET")(input)?;
    let (input, key) = ws(parse_quoted_string)(input)?;
    let (input, value) = ws(parse_quoted_string)(input)?;
    Ok((input, Command::SetPref { key, value }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, key) = ws(parse_quoted_string)(input)?;
    Ok((input, Command::GetPref { key }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let trimmed = input.trim();
    let parsed = alt((
        parse_add,
        parse_search,
        parse_update,
        parse_remove,
        parse_set,
        parse_get,
        parse_help,
        parse_exit,
    ))(trimmed);

    match parsed {
        Ok((rest, command)) if rest.trim().is_empty() => Ok(command),
        Ok((rest, _)) => Err(format!("unexpected trailing input: '{}'", rest.trim())),
        Err(_) => Err("unrecognized command (try HELP)".to_string()),
    }
}
