//! Declared parameter lists.
//!
//! A [`ParamSpec`] is validated once, when the method body is built, and
//! pre-sorted into the groups the binder folds over: leading required,
//! optional, rest, trailing required, keywords, keyword rest and block.

use thiserror::Error;

use super::symbol::Symbol;

/// Index into the owning iseq's `children` holding a default-value fragment.
pub type DefaultExpr = usize;

/// Parameter descriptor tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// `a`
    Required,
    /// `a = expr`
    Optional(DefaultExpr),
    /// `*rest`
    Rest,
    /// `a:`
    RequiredKeyword,
    /// `a: expr`
    OptionalKeyword(DefaultExpr),
    /// `**opts`
    KeywordRest,
    /// `&blk`
    Block,
    /// `...`, occupies three consecutive slots: rest, keyword rest, block
    Forward,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: Symbol,
    /// Descriptor tag
    pub kind: ParamKind,
    /// Local slot receiving the bound value
    pub slot: u32,
}

impl Param {
    /// Creates a parameter.
    pub fn new(name: &str, kind: ParamKind, slot: u32) -> Self {
        Self {
            name: Symbol::intern(name),
            kind,
            slot,
        }
    }
}

/// Invalid parameter list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    /// A parameter appears where its kind is not allowed
    #[error("unexpected parameter '{0}' in this position")]
    OutOfOrder(Symbol),
    /// The same name is declared twice
    #[error("duplicated argument name '{0}'")]
    Duplicate(Symbol),
}

/// Slots holding the pieces captured by a `...` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardSlots {
    /// Positional rest array
    pub rest: u32,
    /// Keyword rest hash
    pub keyword_rest: u32,
    /// Block
    pub block: u32,
}

#[derive(Clone, Copy, PartialEq, PartialOrd)]
enum Phase {
    Lead,
    Optional,
    Rest,
    Post,
    Keywords,
    KeywordRest,
    Block,
}

/// A validated, grouped parameter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSpec {
    params: Vec<Param>,
    lead: Vec<usize>,
    optional: Vec<usize>,
    rest: Option<usize>,
    post: Vec<usize>,
    keywords: Vec<usize>,
    keyword_rest: Option<usize>,
    block: Option<usize>,
    forward: Option<ForwardSlots>,
}

impl ParamSpec {
    /// A spec with no parameters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates and groups `params`, expanding `...` into its three slots.
    pub fn new(params: Vec<Param>) -> Result<Self, ParamError> {
        let mut spec = ParamSpec::default();
        let mut phase = Phase::Lead;

        for param in params {
            if param.kind != ParamKind::Forward && spec.params.iter().any(|p| p.name == param.name)
            {
                return Err(ParamError::Duplicate(param.name));
            }
            let index = spec.params.len();
            match param.kind {
                ParamKind::Required if phase == Phase::Lead => spec.lead.push(index),
                ParamKind::Required if phase <= Phase::Post => {
                    phase = Phase::Post;
                    spec.post.push(index);
                }
                ParamKind::Optional(_) if phase <= Phase::Optional => {
                    phase = Phase::Optional;
                    spec.optional.push(index);
                }
                ParamKind::Rest if phase <= Phase::Optional => {
                    phase = Phase::Rest;
                    spec.rest = Some(index);
                }
                ParamKind::RequiredKeyword | ParamKind::OptionalKeyword(_)
                    if phase <= Phase::Keywords =>
                {
                    phase = Phase::Keywords;
                    spec.keywords.push(index);
                }
                ParamKind::KeywordRest if phase <= Phase::Keywords => {
                    phase = Phase::KeywordRest;
                    spec.keyword_rest = Some(index);
                }
                ParamKind::Block if phase < Phase::Block => {
                    phase = Phase::Block;
                    spec.block = Some(index);
                }
                ParamKind::Forward if phase == Phase::Lead => {
                    let slots = ForwardSlots {
                        rest: param.slot,
                        keyword_rest: param.slot + 1,
                        block: param.slot + 2,
                    };
                    spec.rest = Some(index);
                    spec.keyword_rest = Some(index + 1);
                    spec.block = Some(index + 2);
                    spec.params.push(Param::new("*", ParamKind::Rest, slots.rest));
                    spec.params.push(Param::new("**", ParamKind::KeywordRest, slots.keyword_rest));
                    spec.params.push(Param::new("&", ParamKind::Block, slots.block));
                    spec.forward = Some(slots);
                    phase = Phase::Block;
                    continue;
                }
                _ => return Err(ParamError::OutOfOrder(param.name)),
            }
            spec.params.push(param);
        }
        Ok(spec)
    }

    /// All parameters after `...` expansion, in declaration order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn select<'a>(&'a self, indices: &'a [usize]) -> impl Iterator<Item = &'a Param> + 'a {
        indices.iter().map(|&i| &self.params[i])
    }

    /// Required positionals before any optional or rest parameter.
    pub fn lead(&self) -> impl Iterator<Item = &Param> {
        self.select(&self.lead)
    }

    /// Optional positionals.
    pub fn optional(&self) -> impl Iterator<Item = &Param> {
        self.select(&self.optional)
    }

    /// Required positionals bound from the back.
    pub fn post(&self) -> impl Iterator<Item = &Param> {
        self.select(&self.post)
    }

    /// Keyword parameters in declaration order.
    pub fn keywords(&self) -> impl Iterator<Item = &Param> {
        self.select(&self.keywords)
    }

    /// The rest parameter.
    pub fn rest(&self) -> Option<&Param> {
        self.rest.map(|i| &self.params[i])
    }

    /// The keyword rest parameter.
    pub fn keyword_rest(&self) -> Option<&Param> {
        self.keyword_rest.map(|i| &self.params[i])
    }

    /// The block parameter.
    pub fn block(&self) -> Option<&Param> {
        self.block.map(|i| &self.params[i])
    }

    /// Slots captured by `...`, if declared.
    pub fn forward(&self) -> Option<ForwardSlots> {
        self.forward
    }

    /// Leading plus trailing required count.
    pub fn required_count(&self) -> usize {
        self.lead.len() + self.post.len()
    }

    /// Number of leading required positionals.
    pub fn lead_count(&self) -> usize {
        self.lead.len()
    }

    /// Number of trailing required positionals.
    pub fn post_count(&self) -> usize {
        self.post.len()
    }

    /// Number of optional positionals.
    pub fn optional_count(&self) -> usize {
        self.optional.len()
    }

    /// Whether a rest parameter is declared.
    pub fn has_rest(&self) -> bool {
        self.rest.is_some()
    }

    /// Whether any keyword or keyword-rest parameter is declared.
    pub fn accepts_keywords(&self) -> bool {
        !self.keywords.is_empty() || self.keyword_rest.is_some()
    }

    /// Ruby's `arity`: negative when the method takes a variable count.
    pub fn arity(&self) -> i64 {
        let required = self.required_count() as i64;
        let required_keywords = self
            .keywords()
            .any(|p| p.kind == ParamKind::RequiredKeyword);
        let required = required + i64::from(required_keywords);
        let optional_keywords = !required_keywords && self.accepts_keywords();
        if !self.optional.is_empty() || self.rest.is_some() || optional_keywords {
            -(required + 1)
        } else {
            required
        }
    }
}
