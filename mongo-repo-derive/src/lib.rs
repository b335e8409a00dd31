use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Field, Fields, LitStr, Token, meta::ParseNestedMeta,
    parse_macro_input, spanned::Spanned, token,
};

#[proc_macro_derive(Model, attributes(model, serde))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_model(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(Fields, attributes(model, serde))]
pub fn derive_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_fields(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_model(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "Model can not be derived for generic types",
        ));
    }

    let struct_name = &input.ident;
    let attrs = ModelAttrs::parse(&input.attrs)?;
    let model_name = attrs.name.unwrap_or_else(|| struct_name.to_string());
    let collection_name = attrs.collection.unwrap_or_else(|| model_name.clone());
    let plural_name = attrs.plural.unwrap_or_else(|| format!("{model_name}s"));
    let connector_name = attrs.connector.unwrap_or_else(|| "default".to_string());

    let fields_impl = expand_fields(input)?;

    Ok(quote! {
        #fields_impl

        impl ::mongo_repo::Model for #struct_name {
            fn collection_name() -> &'static str {
                #collection_name
            }

            fn model_name() -> &'static str {
                #model_name
            }

            fn plural_model_name() -> &'static str {
                #plural_name
            }

            fn connector_name() -> &'static str {
                #connector_name
            }
        }

        ::mongo_repo::inventory::submit! {
            ::mongo_repo::ModelMeta {
                model_name: #model_name,
                collection_name: #collection_name,
                connector_name: #connector_name,
                fields: <#struct_name as ::mongo_repo::Fields>::fields,
            }
        }
    })
}

fn expand_fields(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;
    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "only structs with named fields are supported",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "only structs with named fields are supported",
            ));
        }
    };

    let rename_all = container_rename_all(&input.attrs)?;

    let mut pushes = Vec::with_capacity(named.len());
    for field in named {
        let attrs = FieldAttrs::parse(field)?;
        if attrs.skip {
            continue;
        }
        let ty = &field.ty;
        // 展开的结构体把自己的字段并入外层
        if attrs.flatten {
            pushes.push(quote! {
                fields.extend(<#ty as ::mongo_repo::Fields>::fields());
            });
            continue;
        }

        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let ident = ident.to_string();
        let ident = ident.strip_prefix("r#").unwrap_or(&ident).to_string();

        let storage_name = attrs
            .rename
            .unwrap_or_else(|| rename_all.map_or_else(|| ident.clone(), |rule| rule.apply(&ident)));
        let name = attrs.name.unwrap_or_else(|| ident.clone());
        let type_name = quote!(#ty).to_string();

        pushes.push(quote! {
            fields.push(::mongo_repo::FieldDescriptor::new(#name, #storage_name, #type_name));
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::mongo_repo::Fields for #struct_name #ty_generics #where_clause {
            fn fields() -> ::std::vec::Vec<::mongo_repo::FieldDescriptor> {
                let mut fields = ::std::vec::Vec::new();
                #(#pushes)*
                fields
            }
        }
    })
}

#[derive(Default)]
struct ModelAttrs {
    name: Option<String>,
    collection: Option<String>,
    plural: Option<String>,
    connector: Option<String>,
}

impl ModelAttrs {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("model")) {
            attr.parse_nested_meta(|meta| {
                let slot = if meta.path.is_ident("name") {
                    &mut parsed.name
                } else if meta.path.is_ident("collection") {
                    &mut parsed.collection
                } else if meta.path.is_ident("plural") {
                    &mut parsed.plural
                } else if meta.path.is_ident("connector") {
                    &mut parsed.connector
                } else {
                    return Err(meta.error("unknown model attribute"));
                };
                *slot = Some(meta.value()?.parse::<LitStr>()?.value());
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}

#[derive(Default)]
struct FieldAttrs {
    name: Option<String>,
    rename: Option<String>,
    skip: bool,
    flatten: bool,
}

impl FieldAttrs {
    fn parse(field: &Field) -> syn::Result<Self> {
        let mut parsed = Self::default();
        for attr in &field.attrs {
            if attr.path().is_ident("model") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        parsed.name = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("skip") {
                        parsed.skip = true;
                    } else {
                        return Err(meta.error("unknown model field attribute"));
                    }
                    Ok(())
                })?;
            } else if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") {
                        parsed.rename = parse_rename(&meta)?.or(parsed.rename.take());
                    } else if meta.path.is_ident("skip") {
                        parsed.skip = true;
                    } else if meta.path.is_ident("flatten") {
                        parsed.flatten = true;
                    } else {
                        skip_value(&meta)?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(parsed)
    }
}

// rename = "x" 或 rename(serialize = "x", deserialize = "y")，存储名取序列化的那个
fn parse_rename(meta: &ParseNestedMeta) -> syn::Result<Option<String>> {
    if meta.input.peek(Token![=]) {
        return Ok(Some(meta.value()?.parse::<LitStr>()?.value()));
    }
    let mut serialized = None;
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("serialize") {
            serialized = Some(inner.value()?.parse::<LitStr>()?.value());
        } else {
            skip_value(&inner)?;
        }
        Ok(())
    })?;
    Ok(serialized)
}

// 其他 serde 属性与本宏无关，只需消费掉
fn skip_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(token::Paren) {
        meta.parse_nested_meta(|inner| skip_value(&inner))?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn from_str(rule: &str, span: Span) -> syn::Result<Self> {
        Ok(match rule {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            _ => return Err(syn::Error::new(span, format!("unknown rename rule `{rule}`"))),
        })
    }

    /// Renames a snake_case field identifier.
    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper => field.to_ascii_uppercase(),
            Self::Pascal | Self::Camel => {
                let mut renamed = String::with_capacity(field.len());
                let mut capitalize = matches!(self, Self::Pascal);
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        renamed.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        renamed.push(ch);
                    }
                }
                renamed
            }
            Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => field.replace('_', "-").to_ascii_uppercase(),
        }
    }
}

fn container_rename_all(attrs: &[Attribute]) -> syn::Result<Option<RenameRule>> {
    let mut rule = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(Token![=]) {
                    let lit = meta.value()?.parse::<LitStr>()?;
                    rule = Some(RenameRule::from_str(&lit.value(), lit.span())?);
                } else {
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("serialize") {
                            let lit = inner.value()?.parse::<LitStr>()?;
                            rule = Some(RenameRule::from_str(&lit.value(), lit.span())?);
                        } else {
                            skip_value(&inner)?;
                        }
                        Ok(())
                    })?;
                }
            } else {
                skip_value(&meta)?;
            }
            Ok(())
        })?;
    }
    Ok(rule)
}
