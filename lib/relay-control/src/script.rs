//! Embedded forwarding script deployed to each endpoint
//!
//! This JS source is the deployment artifact the control plane uploads; it
//! mirrors the canonical Rust implementation in `relay-proxy::forwarder`
//! (header precedence, scheme validation, error envelope, CORS). Keep the
//! two in step when changing the wire contract.

/// Worker script source uploaded verbatim on deploy.
pub const WORKER_SCRIPT: &str = r#"addEventListener('fetch', event => {
  event.respondWith(handleRequest(event.request))
})

const STRIPPED_QUERY = ['url', '_cb', '_t']
const CONTROL_HEADERS = ['x-target-url', 'x-my-x-forwarded-for']
const HOP_HEADERS = [
  'connection', 'keep-alive', 'proxy-authenticate', 'proxy-authorization',
  'te', 'trailers', 'transfer-encoding', 'upgrade', 'host', 'content-length'
]

async function handleRequest(request) {
  const url = new URL(request.url)

  // Header takes precedence over the query parameter.
  const raw = request.headers.get('X-Target-URL') || url.searchParams.get('url')
  if (!raw) {
    return errorResponse('no_target', 400, {
      usage: {
        header: 'X-Target-URL: https://example.com',
        query_param: '?url=https://example.com'
      }
    })
  }

  let target
  try {
    target = new URL(raw)
  } catch (e) {
    return errorResponse('invalid_target', 400, { provided: raw })
  }
  if (target.protocol !== 'http:' && target.protocol !== 'https:') {
    return errorResponse('invalid_target', 400, { provided: raw })
  }

  // Pass surviving query parameters through to the target.
  for (const [key, value] of url.searchParams) {
    if (!STRIPPED_QUERY.includes(key)) {
      target.searchParams.append(key, value)
    }
  }

  const headers = new Headers()
  for (const [key, value] of request.headers) {
    const name = key.toLowerCase()
    if (!HOP_HEADERS.includes(name) && !CONTROL_HEADERS.includes(name)) {
      headers.set(key, value)
    }
  }
  headers.set('Host', target.hostname)
  const spoof = request.headers.get('X-My-X-Forwarded-For')
  headers.set('X-Forwarded-For', spoof || randomIp())

  const outbound = new Request(target.toString(), {
    method: request.method,
    headers: headers,
    body: ['GET', 'HEAD'].includes(request.method) ? null : request.body
  })

  let response
  try {
    response = await fetch(outbound)
  } catch (e) {
    return errorResponse('upstream_unreachable', 502, { message: e.message })
  }

  const relayed = new Headers()
  for (const [key, value] of response.headers) {
    if (!['content-encoding', 'content-length', 'transfer-encoding'].includes(key.toLowerCase())) {
      relayed.set(key, value)
    }
  }
  addCors(relayed)

  if (request.method === 'OPTIONS') {
    return new Response(null, { status: 204, headers: relayed })
  }
  return new Response(response.body, {
    status: response.status,
    statusText: response.statusText,
    headers: relayed
  })
}

function addCors(headers) {
  headers.set('Access-Control-Allow-Origin', '*')
  headers.set('Access-Control-Allow-Methods', 'GET, POST, PUT, DELETE, OPTIONS, PATCH, HEAD')
  headers.set('Access-Control-Allow-Headers', '*')
}

function errorResponse(code, status, details) {
  const headers = new Headers({
    'Content-Type': 'application/json',
    'X-Relay-Error': code
  })
  addCors(headers)
  return new Response(JSON.stringify({ error: code, ...details }), { status, headers })
}

function randomIp() {
  return [1, 2, 3, 4].map(() => Math.floor(Math.random() * 254) + 1).join('.')
}
"#;
