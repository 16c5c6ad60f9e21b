use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments, ReturnType,
    Type,
};

use persisto_macro_utils::{
    generate_hasher, generate_key_extractor, generate_method_key,
    generate_precomputed_key_extractor, generate_serializer, parse_persist_attributes,
    PersistAttributes,
};

fn compile_error(msg: &str) -> TokenStream {
    TokenStream::from(quote! { compile_error!(#msg); })
}

/// How a declared `Result` return type names its parts.
enum Fallibility {
    /// `Result<T, E>`
    Explicit(Type, Type),
    /// A one-parameter alias such as `io::Result<T>`; both parts are read
    /// through `Fallible`.
    Alias,
}

fn fallibility(ty: &Type) -> Option<Fallibility> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    let types: Vec<Type> = args
        .args
        .iter()
        .filter_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty.clone()),
            _ => None,
        })
        .collect();
    match types.as_slice() {
        [ok, err] => Some(Fallibility::Explicit(ok.clone(), err.clone())),
        [_] => Some(Fallibility::Alias),
        _ => None,
    }
}

struct Arguments {
    idents: Vec<Ident>,
    pats: Vec<Pat>,
    types: Vec<Type>,
    /// Whether the function takes `&self`.
    method: bool,
}

/// Collects argument names and types, rejecting what a static memoizer
/// cannot hold.
fn collect_arguments(item: &mut ItemFn, has_key: bool) -> Result<Arguments, String> {
    let mut args = Arguments {
        idents: Vec::new(),
        pats: Vec::new(),
        types: Vec::new(),
        method: false,
    };

    for arg in item.sig.inputs.iter_mut() {
        let pat_type = match arg {
            FnArg::Receiver(receiver) => {
                let shared_ref = receiver.reference.is_some()
                    && receiver.mutability.is_none()
                    && receiver.colon_token.is_none();
                if !shared_ref {
                    return Err("#[persist] methods must take `&self`".into());
                }
                if !has_key {
                    return Err(
                        "#[persist] on a method needs a `key` that reads what matters from `self`"
                            .into(),
                    );
                }
                args.method = true;
                continue;
            }
            FnArg::Typed(pat_type) => pat_type,
        };
        if let Type::Reference(_) = *pat_type.ty {
            return Err(
                "#[persist] arguments must be owned values (`String` instead of `&str`)".into(),
            );
        }
        let Pat::Ident(pat_ident) = pat_type.pat.as_mut() else {
            return Err("#[persist] arguments must be plain identifiers".into());
        };
        if pat_ident.by_ref.is_some() || pat_ident.subpat.is_some() {
            return Err("#[persist] arguments must be plain identifiers".into());
        }

        // The body runs inside a closure that rebinds the argument with its
        // original pattern, so `mut` stays there.
        args.pats.push(Pat::Ident(pat_ident.clone()));
        pat_ident.mutability = None;
        args.idents.push(pat_ident.ident.clone());
        args.types.push((*pat_type.ty).clone());
    }

    Ok(args)
}

/// Builds the `MemoizerBuilder` chain for the static memoizer.
fn builder_chain(
    attrs: &PersistAttributes,
    name: &str,
    memo_args: &TokenStream2,
    key: TokenStream2,
    value_type: &TokenStream2,
) -> TokenStream2 {
    let cache = &attrs.cache;
    let serializer =
        generate_serializer(attrs.pickle.as_ref(), attrs.unpickle.as_ref(), value_type);
    let hash = generate_hasher(attrs.hash.as_ref()).map(|hash| quote! { .hash(#hash) });
    let annotate = attrs
        .metadata
        .as_ref()
        .map(|metadata| quote! { .annotate(#metadata) });
    let in_memory = attrs.in_memory.then(|| quote! { .in_memory() });
    let storekey = attrs.storekey;
    let on_unavailable = &attrs.on_unavailable;

    quote! {
        ::persisto::MemoizerBuilder::<#memo_args, #value_type>::bare(#name)
            .cache(#cache)
            .key(#key)
            .serializer(#serializer)
            #hash
            .verify_key(#storekey)
            .on_unavailable(#on_unavailable)
            #annotate
            #in_memory
            .build()
    }
}

/// Makes a function's results persistent.
///
/// The first call with a given set of arguments runs the function and stores
/// its result; later calls with the same arguments, in this process or any
/// later one, read the stored result instead of running the body again.
///
/// The function's return type `T` becomes `Result<T, PersistError<T>>`. A
/// function returning `Result<T, E>` becomes `Result<T, PersistError<T, E>>`:
/// `Err` values of the body come back as `PersistError::Computation` and are
/// never stored.
///
/// # Requirements
///
/// - **Free functions or `&self` methods**: no generics, no `async`. A method
///   needs a `key`, and its return type must not mention `Self`
/// - **Arguments**: owned values implementing `serde::Serialize`
/// - **Return type**: `serde::Serialize + serde::de::DeserializeOwned`, unless
///   `pickle`/`unpickle` are given. `Result<T, E>` and one-parameter aliases
///   such as `io::Result<T>` are fallible; other error-carrying types are
///   stored as plain values
/// - **Purity**: the same arguments must always produce the same result
///
/// # Macro Parameters
///
/// - `cache`: where results live. `"file://<dir>"` or a bare path for a
///   directory tree, `"mongodb://<host:port>"` or `"http(s)://..."` for a REST
///   document store. Any expression evaluating to a string also works.
///   Default: `"file://persist"`.
/// - `name`: directory/collection and statistics name. Default: the function
///   name.
/// - `key`: closure receiving a reference to every argument and returning any
///   serializable key. Parameter types must be written out. On a method the
///   closure receives `self` first.
/// - `hash`: closure `|key: &CacheKey| -> String` producing the identifier.
/// - `pickle` / `unpickle`: closures `|value: &T| -> String` and
///   `|text: &str| -> Result<T, impl Display>` replacing JSON.
/// - `storekey`: `true` to compare the stored key on every hit and report
///   `PersistError::HashCollision` on mismatch.
/// - `metadata`: closure `|| -> String` whose output is stored with every
///   new entry.
/// - `on_unavailable`: `"fail"` (default) or `"bypass"` to run the function
///   without the cache when the backend cannot be reached.
/// - `in_memory`: `true` to keep results in a process-local map as well
///   (requires `T: Clone`).
///
/// # Examples
///
/// ```ignore
/// use persisto::{persist, CacheKey};
///
/// #[persist]
/// fn double(x: f64) -> f64 {
///     x * 2.0
/// }
///
/// #[persist(
///     cache = "file://results",
///     key = |x: &u64, y: &u32| (*x, *y),
///     hash = |key: &CacheKey| {
///         let (x, y): (u64, u32) = key.decode().unwrap_or_default();
///         format!("{x}_to_the_power_of_{y}")
///     },
///     pickle = |value: &u64| value.to_string(),
///     unpickle = |text: &str| text.parse::<u64>(),
/// )]
/// fn power(x: u64, y: u32) -> u64 {
///     x.pow(y)
/// }
///
/// assert_eq!(double(3.0)?, 6.0);
/// assert_eq!(power(2, 4)?, 16); // stored as results/power/2_to_the_power_of_4.out
/// ```
///
/// ## Fallible functions
///
/// ```ignore
/// use persisto::persist;
///
/// #[persist(cache = "mongodb://localhost:5000")]
/// fn fetch_rate(currency: String) -> Result<f64, RateError> {
///     rates_api::lookup(&currency)
/// }
///
/// match fetch_rate("EUR".to_string()) {
///     Ok(rate) => println!("{rate}"),
///     Err(persisto::PersistError::Computation(err)) => eprintln!("lookup failed: {err}"),
///     Err(err) => eprintln!("cache problem: {err}"),
/// }
/// ```
///
/// ## Methods
///
/// Every instance shares the one memoizer of the method, so the key must
/// capture whatever state of `self` the result depends on. Methods of
/// different types with the same name also share a directory unless `name`
/// tells them apart.
///
/// ```ignore
/// struct Adder {
///     base: i64,
/// }
///
/// impl Adder {
///     #[persist(name = "adder_plus", key = |this: &Self, n: &i64| (this.base, *n))]
///     fn plus(&self, n: i64) -> i64 {
///         self.base + n
///     }
/// }
/// ```
///
/// A memoizer whose store cannot be opened (for example a cache directory
/// that cannot be created yet) is built again on the next call.
#[proc_macro_attribute]
pub fn persist(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = match parse_persist_attributes(attr.into()) {
        Ok(attrs) => attrs,
        Err(err) => return TokenStream::from(quote! { #err; }),
    };

    let mut input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_some() {
        return compile_error("#[persist] does not support async functions");
    }
    if !input.sig.generics.params.is_empty() {
        return compile_error("#[persist] does not support generic functions");
    }

    let args = match collect_arguments(&mut input, attrs.key.is_some()) {
        Ok(args) => args,
        Err(msg) => return compile_error(&msg),
    };
    let Arguments {
        idents: arg_idents,
        pats: arg_pats,
        types: arg_types,
        method,
    } = &args;

    let ident = &input.sig.ident;
    let vis = &input.vis;
    let fn_attrs = &input.attrs;
    let block = &input.block;

    let declared = match &input.sig.output {
        ReturnType::Type(_, ty) => (**ty).clone(),
        ReturnType::Default => syn::parse_quote! { () },
    };

    // `Result` functions keep their error type; everything else is treated
    // as infallible.
    let (value_type, error_type, body) = match fallibility(&declared) {
        Some(Fallibility::Explicit(ok, err)) => (
            quote! { #ok },
            quote! { #err },
            quote! { (move || -> #declared #block)() },
        ),
        Some(Fallibility::Alias) => (
            quote! { <#declared as ::persisto::__private::Fallible>::Ok },
            quote! { <#declared as ::persisto::__private::Fallible>::Err },
            quote! {
                ::persisto::__private::Fallible::into_result((move || -> #declared #block)())
            },
        ),
        None => (
            quote! { #declared },
            quote! { ::std::convert::Infallible },
            quote! { ::std::result::Result::Ok((move || #block)()) },
        ),
    };

    let name = attrs.custom_name.clone().unwrap_or_else(|| ident.to_string());
    let memoizer_ident = format_ident!("__PERSIST_MEMOIZER_{}", ident.to_string().to_uppercase());
    let on_unavailable = &attrs.on_unavailable;

    // Methods derive their key from `self` up front and hand the memoizer
    // only that key; free functions hand it their arguments.
    let (memo_args, key_extractor, prelude, compute, call_args) = if *method {
        let key = attrs
            .key
            .as_ref()
            .map(|key| generate_method_key(key, arg_idents));
        (
            quote! { (::persisto::CacheKey,) },
            generate_precomputed_key_extractor(),
            quote! {
                let __key = #key.map_err(::persisto::PersistError::KeyDerivation)?;
            },
            quote! {
                move |_: (::persisto::CacheKey,)| -> ::std::result::Result<#value_type, #error_type> {
                    #( let #arg_pats = #arg_idents; )*
                    #body
                }
            },
            quote! { (__key,) },
        )
    } else {
        (
            quote! { ( #(#arg_types,)* ) },
            generate_key_extractor(attrs.key.as_ref(), arg_idents, arg_types),
            quote! {},
            quote! {
                |( #(#arg_pats,)* ): ( #(#arg_types,)* )| -> ::std::result::Result<#value_type, #error_type> {
                    #body
                }
            },
            quote! { ( #(#arg_idents,)* ) },
        )
    };
    let builder = builder_chain(&attrs, &name, &memo_args, key_extractor, &value_type);

    let mut sig = input.sig.clone();
    sig.output = syn::parse_quote! {
        -> ::std::result::Result<#value_type, ::persisto::PersistError<#value_type, #error_type>>
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #vis #sig {
            // Only a successful build is kept; a failed one is retried on
            // the next call.
            static #memoizer_ident: ::persisto::__private::OnceCell<
                ::persisto::Memoizer<#memo_args, #value_type>,
            > = ::persisto::__private::OnceCell::new();

            #prelude

            let __compute = #compute;

            let __memoizer = match #memoizer_ident.get_or_try_init(|| #builder) {
                ::std::result::Result::Ok(memoizer) => memoizer,
                ::std::result::Result::Err(err) => {
                    ::persisto::__private::report_unavailable(#name, &err);
                    if #on_unavailable == ::persisto::UnavailablePolicy::Bypass {
                        return __compute(#call_args)
                            .map_err(::persisto::PersistError::Computation);
                    }
                    return ::std::result::Result::Err(::persisto::PersistError::Unavailable(err));
                }
            };

            __memoizer.call(#call_args, __compute)
        }
    };

    TokenStream::from(expanded)
}
