//! Shared utilities for persisto procedural macros
//!
//! Attribute parsing and the code fragments that configure the generated
//! `MemoizerBuilder` chain.

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{punctuated::Punctuated, Expr, Ident, Lit, MetaNameValue, Token, Type};

/// Cache address schemes understood by `CacheLocation::parse`.
pub const KNOWN_SCHEMES: &[&str] = &["file", "mongodb", "http", "https"];

/// Parsed `#[persist(...)]` attributes
pub struct PersistAttributes {
    pub cache: TokenStream2,
    pub custom_name: Option<String>,
    pub key: Option<Expr>,
    pub hash: Option<Expr>,
    pub pickle: Option<Expr>,
    pub unpickle: Option<Expr>,
    pub storekey: bool,
    pub metadata: Option<Expr>,
    pub on_unavailable: TokenStream2,
    pub in_memory: bool,
}

impl Default for PersistAttributes {
    fn default() -> Self {
        Self {
            cache: quote! { ::persisto::DEFAULT_CACHE },
            custom_name: None,
            key: None,
            hash: None,
            pickle: None,
            unpickle: None,
            storekey: false,
            metadata: None,
            on_unavailable: quote! { ::persisto::UnavailablePolicy::Fail },
            in_memory: false,
        }
    }
}

fn compile_error(msg: &str) -> TokenStream2 {
    quote! { compile_error!(#msg) }
}

/// Parse the `cache` attribute
///
/// String literals are checked at compile time; any other expression is
/// passed through and parsed when the memoizer is first built.
pub fn parse_cache_attribute(nv: &MetaNameValue) -> Result<TokenStream2, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(s) => {
                let address = s.value();
                if let Some((scheme, _)) = address.split_once("://") {
                    if !KNOWN_SCHEMES.contains(&scheme) {
                        return Err(compile_error(&format!(
                            "Invalid cache address `{address}`: expected a `file://`, `mongodb://`, `http://` or `https://` address"
                        )));
                    }
                }
                Ok(quote! { #s })
            }
            _ => Err(compile_error("Invalid literal for `cache`: expected string")),
        },
        expr => Ok(quote! { #expr }),
    }
}

/// Parse the `name` attribute
pub fn parse_name_attribute(nv: &MetaNameValue) -> Result<String, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(s) if !s.value().is_empty() => Ok(s.value()),
            _ => Err(compile_error("Invalid literal for `name`: expected non-empty string")),
        },
        _ => Err(compile_error("Invalid syntax for `name`: expected `name = \"...\"`")),
    }
}

/// Parse a boolean flag such as `storekey` or `in_memory`
pub fn parse_bool_attribute(nv: &MetaNameValue) -> Result<bool, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Bool(b) => Ok(b.value),
            _ => Err(compile_error("Invalid literal: expected `true` or `false`")),
        },
        _ => Err(compile_error("Invalid syntax: expected `true` or `false`")),
    }
}

/// Parse the `on_unavailable` attribute
pub fn parse_on_unavailable_attribute(nv: &MetaNameValue) -> Result<TokenStream2, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(s) => match s.value().as_str() {
                "fail" => Ok(quote! { ::persisto::UnavailablePolicy::Fail }),
                "bypass" => Ok(quote! { ::persisto::UnavailablePolicy::Bypass }),
                _ => Err(compile_error(
                    "Invalid on_unavailable: expected \"fail\" or \"bypass\"",
                )),
            },
            _ => Err(compile_error("Invalid literal for `on_unavailable`: expected string")),
        },
        _ => Err(compile_error(
            "Invalid syntax for `on_unavailable`: expected `on_unavailable = \"fail\"|\"bypass\"`",
        )),
    }
}

/// Parse persist attributes from a token stream
pub fn parse_persist_attributes(attr: TokenStream2) -> Result<PersistAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<MetaNameValue, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| {
        let msg = format!("Failed to parse attributes: {}", e);
        quote! { compile_error!(#msg) }
    })?;

    let mut attrs = PersistAttributes::default();

    for nv in parsed_args {
        let Some(ident) = nv.path.get_ident() else {
            return Err(compile_error("Invalid attribute: expected a plain name"));
        };
        match ident.to_string().as_str() {
            "cache" => attrs.cache = parse_cache_attribute(&nv)?,
            "name" => attrs.custom_name = Some(parse_name_attribute(&nv)?),
            "key" => attrs.key = Some(nv.value),
            "hash" => attrs.hash = Some(nv.value),
            "pickle" => attrs.pickle = Some(nv.value),
            "unpickle" => attrs.unpickle = Some(nv.value),
            "storekey" => attrs.storekey = parse_bool_attribute(&nv)?,
            "metadata" => attrs.metadata = Some(nv.value),
            "on_unavailable" => attrs.on_unavailable = parse_on_unavailable_attribute(&nv)?,
            "in_memory" => attrs.in_memory = parse_bool_attribute(&nv)?,
            other => {
                return Err(compile_error(&format!(
                    "Unknown attribute `{other}`: expected one of cache, name, key, hash, pickle, unpickle, storekey, metadata, on_unavailable, in_memory"
                )))
            }
        }
    }

    if attrs.pickle.is_some() != attrs.unpickle.is_some() {
        return Err(compile_error("`pickle` and `unpickle` must be given together"));
    }

    Ok(attrs)
}

/// Generate the key extractor passed to `MemoizerBuilder::key`
///
/// Without a custom `key` expression the arguments are keyed by name. A
/// custom expression is called with a reference to every argument and its
/// result is serialized into the key.
pub fn generate_key_extractor(
    key: Option<&Expr>,
    arg_idents: &[Ident],
    arg_types: &[Type],
) -> TokenStream2 {
    let names: Vec<String> = arg_idents.iter().map(ToString::to_string).collect();
    match key {
        None if arg_idents.is_empty() => quote! { ::persisto::ArgumentKey::new() },
        None => quote! { ::persisto::ArgumentKey::named([#(#names),*]) },
        Some(key) => quote! {
            move |__args: &( #(#arg_types,)* )| -> ::std::result::Result<::persisto::CacheKey, ::persisto::KeyError> {
                let ( #(#arg_idents,)* ) = __args;
                ::persisto::CacheKey::of(&(#key)( #(#arg_idents),* ))
            }
        },
    }
}

/// Generate the key derivation of a `&self` method, evaluated before the
/// memoizer is consulted. The key closure receives `self` followed by a
/// reference to every argument.
pub fn generate_method_key(key: &Expr, arg_idents: &[Ident]) -> TokenStream2 {
    quote! {
        ::persisto::CacheKey::of(&(#key)(self, #(&#arg_idents),*))
    }
}

/// Key extractor of a method memoizer: its only argument is the key derived
/// by [`generate_method_key`].
pub fn generate_precomputed_key_extractor() -> TokenStream2 {
    quote! {
        |__args: &(::persisto::CacheKey,)| -> ::std::result::Result<::persisto::CacheKey, ::persisto::KeyError> {
            ::std::result::Result::Ok(__args.0.clone())
        }
    }
}

/// Generate the hasher passed to `MemoizerBuilder::hash`, if any
pub fn generate_hasher(hash: Option<&Expr>) -> Option<TokenStream2> {
    hash.map(|hash| {
        quote! {
            move |__key: &::persisto::CacheKey| -> ::std::string::String { (#hash)(__key) }
        }
    })
}

/// Generate the serializer passed to `MemoizerBuilder::serializer`
pub fn generate_serializer(
    pickle: Option<&Expr>,
    unpickle: Option<&Expr>,
    value_type: &TokenStream2,
) -> TokenStream2 {
    match (pickle, unpickle) {
        (Some(pickle), Some(unpickle)) => quote! {
            ::persisto::FnSerializer::<#value_type, _, _>::new(#pickle, #unpickle)
        },
        _ => quote! { ::persisto::JsonSerializer },
    }
}
