//! # objstream Derive Macros
//!
//! This crate provides the procedural macros for `objstream`. `#[derive(Serializable)]`
//! generates the `SerialType` description of a struct (wire name, field accessor table, base
//! link, hook bindings) or, for a fieldless enum, its `SerialType`, `SerialEnum` and
//! `SerialField` implementations.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Expr, Fields, LitStr, parse_macro_input};

/// Derives `SerialType` (plus `SerialEnum` and `SerialField` for enums).
///
/// Container attributes, inside `#[serial(...)]`:
/// - `name = "com.example.Point"`: wire name (default: the type name).
/// - `suid = 42`: explicit version identifier.
/// - `write_object`, `read_object`, `read_object_no_data`: bind the matching hook trait.
/// - `write_replace = "public"`, `read_resolve = "private"`: bind a substitution hook with its
///   inheritance visibility (`public`, `protected`, `package`, `private`).
/// - `externalizable`: the type implements `Externalizable`.
/// - `no_factory`: the type has no `Default` allocation and can only be written.
///
/// Field attributes, inside `#[serial(...)]`:
/// - `skip`: not a serial field (it keeps its `Default` value on read).
/// - `base`: the field holds the serializable base part.
/// - `unshared`, `rename = "x"`, `signature = "Lcom/example/Node;"`.
#[proc_macro_derive(Serializable, attributes(serial))]
pub fn derive_serializable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let result = if !input.generics.params.is_empty() {
        Err(syn::Error::new_spanned(
            &input.generics,
            "Serializable does not support generic types",
        ))
    } else {
        match &input.data {
            Data::Struct(ds) => expand_struct(&input, &ds.fields),
            Data::Enum(de) => expand_enum(&input, de),
            Data::Union(_) => Err(syn::Error::new(
                input.ident.span(),
                "Serializable only supports structs and fieldless enums",
            )),
        }
    };
    result.unwrap_or_else(|e| e.to_compile_error()).into()
}

// --- Attribute parsing ---

#[derive(Default)]
struct ContainerAttrs {
    name: Option<String>,
    suid: Option<Expr>,
    write_object: bool,
    read_object: bool,
    read_object_no_data: bool,
    write_replace: Option<String>,
    read_resolve: Option<String>,
    externalizable: bool,
    no_factory: bool,
}

#[derive(Default)]
struct FieldAttrs {
    skip: bool,
    base: bool,
    unshared: bool,
    rename: Option<String>,
    signature: Option<String>,
}

fn parse_container(attrs: &[Attribute]) -> syn::Result<ContainerAttrs> {
    let mut out = ContainerAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("serial") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let key = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();
            match key.as_str() {
                "name" => out.name = Some(meta.value()?.parse::<LitStr>()?.value()),
                "suid" => out.suid = Some(meta.value()?.parse::<Expr>()?),
                "write_object" => out.write_object = true,
                "read_object" => out.read_object = true,
                "read_object_no_data" => out.read_object_no_data = true,
                "write_replace" => {
                    out.write_replace = Some(meta.value()?.parse::<LitStr>()?.value());
                }
                "read_resolve" => {
                    out.read_resolve = Some(meta.value()?.parse::<LitStr>()?.value());
                }
                "externalizable" => out.externalizable = true,
                "no_factory" => out.no_factory = true,
                _ => {
                    return Err(meta.error(
                        "Unknown serial attribute key. Supported: name, suid, write_object, \
                         read_object, read_object_no_data, write_replace, read_resolve, \
                         externalizable, no_factory",
                    ));
                }
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn parse_field(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("serial") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") || meta.path.is_ident("transient") {
                out.skip = true;
            } else if meta.path.is_ident("base") {
                out.base = true;
            } else if meta.path.is_ident("unshared") {
                out.unshared = true;
            } else if meta.path.is_ident("rename") {
                out.rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("signature") {
                out.signature = Some(meta.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(meta.error(
                    "Unknown serial field attribute. Supported: skip, base, unshared, rename, \
                     signature",
                ));
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn visibility(value: &str, span: proc_macro2::Span) -> syn::Result<TokenStream2> {
    let variant = match value {
        "public" => quote!(Public),
        "protected" => quote!(Protected),
        "package" => quote!(Package),
        "private" => quote!(Private),
        other => {
            return Err(syn::Error::new(
                span,
                format!(
                    "unknown visibility `{other}`; expected public, protected, package or private"
                ),
            ));
        }
    };
    Ok(quote!(::objstream::desc::Visibility::#variant))
}

// --- Generator: structs ---

fn expand_struct(input: &DeriveInput, fields: &Fields) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let attrs = parse_container(&input.attrs)?;
    let wire_name = attrs.name.clone().unwrap_or_else(|| name.to_string());

    let mut field_specs = Vec::new();
    let mut base = None;
    if let Fields::Named(named) = fields {
        for field in &named.named {
            let fattrs = parse_field(&field.attrs)?;
            let Some(ident) = &field.ident else { continue };
            let ty = &field.ty;
            if fattrs.base {
                if base.is_some() {
                    return Err(syn::Error::new_spanned(field, "only one field can be the base"));
                }
                base = Some((ident.clone(), ty.clone()));
                continue;
            }
            if fattrs.skip {
                continue;
            }
            let field_name = fattrs
                .rename
                .unwrap_or_else(|| ident.to_string().trim_start_matches("r#").to_string());
            let unshared = fattrs.unshared.then(|| quote!(.unshared()));
            let signature = fattrs.signature.map(|s| quote!(.signature(#s)));
            field_specs.push(quote! {
                .field(
                    ::objstream::desc::FieldSpec::new::<#name, #ty>(
                        #field_name,
                        |s: &#name| &s.#ident,
                        |s: &mut #name| &mut s.#ident,
                    )
                    #unshared
                    #signature
                )
            });
        }
    } else if !matches!(fields, Fields::Unit) {
        return Err(syn::Error::new(
            name.span(),
            "Serializable supports structs with named fields and unit structs",
        ));
    }

    let base_link = base.map(|(ident, ty)| {
        quote! {
            .base::<#ty>(
                {
                    fn upcast(obj: &dyn ::std::any::Any) -> Option<&dyn ::std::any::Any> {
                        obj.downcast_ref::<#name>().map(|s| &s.#ident as &dyn ::std::any::Any)
                    }
                    upcast
                },
                {
                    fn upcast_mut(
                        obj: &mut dyn ::std::any::Any,
                    ) -> Option<&mut dyn ::std::any::Any> {
                        obj.downcast_mut::<#name>()
                            .map(|s| &mut s.#ident as &mut dyn ::std::any::Any)
                    }
                    upcast_mut
                },
            )
        }
    });

    let suid = attrs.suid.as_ref().map(|e| quote!(.suid(#e)));
    let span = name.span();
    let mut hooks = Vec::new();
    if attrs.write_object {
        hooks.push(quote!(.write_object()));
    }
    if attrs.read_object {
        hooks.push(quote!(.read_object()));
    }
    if attrs.read_object_no_data {
        hooks.push(quote!(.read_object_no_data()));
    }
    if let Some(v) = &attrs.write_replace {
        let v = visibility(v, span)?;
        hooks.push(quote!(.write_replace(#v)));
    }
    if let Some(v) = &attrs.read_resolve {
        let v = visibility(v, span)?;
        hooks.push(quote!(.read_resolve(#v)));
    }
    let kind = if attrs.externalizable {
        quote!(.externalizable())
    } else if attrs.no_factory {
        quote!()
    } else {
        quote!(.factory())
    };

    Ok(quote! {
        impl ::objstream::desc::SerialType for #name {
            fn type_info() -> ::objstream::desc::TypeInfo {
                ::objstream::desc::TypeInfo::builder::<Self>(#wire_name)
                    #suid
                    #base_link
                    #(#field_specs)*
                    #(#hooks)*
                    #kind
                    .build()
            }
        }
    })
}

// --- Generator: enums ---

fn expand_enum(input: &DeriveInput, data: &syn::DataEnum) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let attrs = parse_container(&input.attrs)?;
    let wire_name = attrs.name.unwrap_or_else(|| name.to_string());

    let mut variants = Vec::new();
    for v in &data.variants {
        if !matches!(v.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                v,
                "Serializable enums must be fieldless",
            ));
        }
        variants.push(&v.ident);
    }
    if variants.is_empty() {
        return Err(syn::Error::new(name.span(), "Serializable enums need at least one constant"));
    }
    let constants: Vec<String> = variants.iter().map(|v| v.to_string()).collect();
    let ordinals = 0..variants.len();

    Ok(quote! {
        impl ::objstream::desc::SerialType for #name {
            fn type_info() -> ::objstream::desc::TypeInfo {
                ::objstream::desc::TypeInfo::builder::<Self>(#wire_name)
                    .enumeration()
                    .build()
            }
        }

        impl ::objstream::desc::SerialEnum for #name {
            const WIRE_NAME: &'static str = #wire_name;
            const CONSTANTS: &'static [&'static str] = &[#(#constants),*];

            fn ordinal(&self) -> usize {
                match self {
                    #(Self::#variants => #ordinals,)*
                }
            }

            fn from_ordinal(ordinal: usize) -> Option<Self> {
                ::objstream::rt::enum_from_ordinal(&[#(Self::#variants),*], ordinal)
            }
        }

        impl ::objstream::desc::SerialField for #name {
            const TYPE_CODE: u8 = b'L';

            fn signature() -> ::std::borrow::Cow<'static, str> {
                ::objstream::rt::object_signature(#wire_name)
            }

            fn to_field(&self) -> ::objstream::FieldValue {
                ::objstream::rt::enum_to_field(self)
            }

            fn from_field(value: ::objstream::FieldValue) -> ::objstream::Result<Self> {
                ::objstream::rt::enum_from_field(value)
            }
        }
    })
}
